//! Error classification for recovery decisions

use crate::error::MeldError;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Validation,
    ResourceExhaustion,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    TripBreaker,
    Retry,
    LogOnly,
    Fallback,
}

impl RecoveryAction {
    pub fn is_retryable(self) -> bool {
        matches!(self, RecoveryAction::TripBreaker | RecoveryAction::Retry)
    }
}

impl ErrorKind {
    pub fn action(self) -> RecoveryAction {
        match self {
            ErrorKind::Connection => RecoveryAction::TripBreaker,
            ErrorKind::Timeout | ErrorKind::Unknown => RecoveryAction::Retry,
            ErrorKind::Validation => RecoveryAction::LogOnly,
            ErrorKind::ResourceExhaustion => RecoveryAction::Fallback,
        }
    }
}

/// Maps errors to an [`ErrorKind`], first by variant and then by message
pub struct ErrorClassifier {
    patterns: Vec<(ErrorKind, Regex)>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        let table = [
            (
                ErrorKind::Validation,
                r"(?i)\b(invalid|validation|malformed|parse|bad request|unprocessable)\b",
            ),
            (
                ErrorKind::Timeout,
                r"(?i)(timed? ?out|deadline|elapsed)",
            ),
            (
                ErrorKind::ResourceExhaustion,
                r"(?i)(exhaust|out of memory|quota|rate.?limit|too many|capacity|\b429\b)",
            ),
            (
                ErrorKind::Connection,
                r"(?i)(connection|connect|refused|reset|unreachable|broken pipe|dns|network|unavailable|circuit open)",
            ),
        ];

        let patterns = table
            .into_iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((kind, regex)),
                Err(e) => {
                    tracing::error!(?kind, error = %e, "Skipping bad classification pattern");
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    pub fn classify(&self, error: &MeldError) -> ErrorKind {
        match error {
            MeldError::AdapterTimeout { .. } | MeldError::RequestTimeout { .. } => {
                return ErrorKind::Timeout
            }
            MeldError::InvalidRequest(_)
            | MeldError::ConfigValidation { .. }
            | MeldError::InvalidConfigValue { .. }
            | MeldError::FusionInput { .. } => return ErrorKind::Validation,
            _ => {}
        }

        self.classify_message(&error.to_string())
    }

    pub fn classify_message(&self, message: &str) -> ErrorKind {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(message))
            .map_or(ErrorKind::Unknown, |(kind, _)| *kind)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_classify_directly() {
        let classifier = ErrorClassifier::new();
        let timeout = MeldError::AdapterTimeout {
            engine: "text".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(classifier.classify(&timeout), ErrorKind::Timeout);
        assert_eq!(
            classifier.classify(&MeldError::InvalidRequest("empty".to_string())),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_message_patterns() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify_message("connection refused by peer"),
            ErrorKind::Connection
        );
        assert_eq!(
            classifier.classify_message("HTTP 429: rate limit reached"),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            classifier.classify_message("malformed response body"),
            ErrorKind::Validation
        );
        assert_eq!(classifier.classify_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn test_actions() {
        assert_eq!(ErrorKind::Connection.action(), RecoveryAction::TripBreaker);
        assert_eq!(ErrorKind::Validation.action(), RecoveryAction::LogOnly);
        assert!(!ErrorKind::Validation.action().is_retryable());
        assert!(!ErrorKind::ResourceExhaustion.action().is_retryable());
        assert!(ErrorKind::Timeout.action().is_retryable());
    }

    #[test]
    fn test_open_breaker_is_connection() {
        let classifier = ErrorClassifier::new();
        let open = MeldError::AdapterUnavailable {
            engine: "vector".to_string(),
            reason: "circuit open".to_string(),
        };
        assert_eq!(classifier.classify(&open), ErrorKind::Connection);
    }
}
