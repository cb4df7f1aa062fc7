//! Failure isolation for engine calls
//!
//! [`ErrorHandler`] combines the breaker registry, the retry helper, error
//! classification and optional per-resource fallbacks. Classification only
//! drives logging and retry decisions; an error still propagates unless a
//! fallback produces a value.

mod breaker;
mod classify;
mod retry;

pub use breaker::{BreakerPermit, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use classify::{ErrorClassifier, ErrorKind, RecoveryAction};
pub use retry::{backoff_delay, retry_with_breaker};

use crate::config::{BreakerConfig, RetryConfig};
use crate::engine::EngineHit;
use crate::error::{MeldError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Produces substitute hits for a resource whose call failed
pub type FallbackHandler = Arc<dyn Fn(&MeldError) -> Option<Vec<EngineHit>> + Send + Sync>;

pub struct ErrorHandler {
    breakers: Arc<BreakerRegistry>,
    retry: RwLock<RetryConfig>,
    classifier: ErrorClassifier,
    fallbacks: RwLock<HashMap<String, FallbackHandler>>,
}

impl ErrorHandler {
    pub fn new(breaker: BreakerConfig, retry: RetryConfig) -> Self {
        Self {
            breakers: Arc::new(BreakerRegistry::new(breaker)),
            retry: RwLock::new(retry),
            classifier: ErrorClassifier::new(),
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn register_fallback(&self, resource: impl Into<String>, handler: FallbackHandler) {
        self.fallbacks.write().insert(resource.into(), handler);
    }

    pub fn remove_fallback(&self, resource: &str) -> bool {
        self.fallbacks.write().remove(resource).is_some()
    }

    pub fn reconfigure(&self, breaker: &BreakerConfig, retry: &RetryConfig) {
        self.breakers.reconfigure(breaker);
        *self.retry.write() = retry.clone();
    }

    /// Call `resource` through its breaker with retries. On failure the
    /// resource's fallback, if any, is consulted when the breaker is open or
    /// the error calls for an immediate fallback.
    pub async fn execute<F, Fut>(&self, resource: &str, op: F) -> Result<Vec<EngineHit>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<EngineHit>>>,
    {
        let breaker = self.breakers.get(resource);
        let retry = self.retry.read().clone();

        let error = match retry_with_breaker(&breaker, &retry, &self.classifier, op).await {
            Ok(hits) => return Ok(hits),
            Err(e) => e,
        };

        let kind = self.classifier.classify(&error);
        let action = kind.action();
        match action {
            RecoveryAction::LogOnly => {
                tracing::debug!(resource, ?kind, error = %error, "Engine call rejected")
            }
            _ => tracing::warn!(resource, ?kind, ?action, error = %error, "Engine call failed"),
        }

        let wants_fallback =
            action == RecoveryAction::Fallback || breaker.state() == BreakerState::Open;
        if wants_fallback {
            let handler = self.fallbacks.read().get(resource).cloned();
            if let Some(hits) = handler.and_then(|h| h(&error)) {
                tracing::info!(resource, hits = hits.len(), "Serving fallback results");
                return Ok(hits);
            }
        }

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ErrorHandler {
        ErrorHandler::new(
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
            RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
        )
    }

    fn refused() -> MeldError {
        MeldError::AdapterUnavailable {
            engine: "text".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_error_propagates_without_fallback() {
        let handler = handler();
        let result = handler.execute("text", || async { Err(refused()) }).await;
        assert!(matches!(result, Err(MeldError::AdapterUnavailable { .. })));
        assert_eq!(handler.breakers().state("text"), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_fallback_serves_when_open() {
        let handler = handler();
        handler.register_fallback(
            "text",
            Arc::new(|_| Some(vec![EngineHit::new("cached", "stale copy", 0.1)])),
        );

        let hits = handler
            .execute("text", || async { Err(refused()) })
            .await
            .unwrap();
        assert_eq!(hits[0].id.as_deref(), Some("cached"));

        // short-circuited calls also reach the fallback
        let hits = handler
            .execute("text", || async { Ok(Vec::new()) })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_error_skips_fallback() {
        let handler = handler();
        handler.register_fallback("text", Arc::new(|_| Some(Vec::new())));
        let result = handler
            .execute("text", || async {
                Err(MeldError::InvalidRequest("bad".to_string()))
            })
            .await;
        assert!(matches!(result, Err(MeldError::InvalidRequest(_))));
        assert!(handler.remove_fallback("text"));
    }
}
