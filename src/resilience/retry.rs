//! Exponential backoff with jitter, run inside the breaker

use crate::config::RetryConfig;
use crate::error::Result;
use crate::resilience::breaker::{BreakerState, CircuitBreaker};
use crate::resilience::classify::ErrorClassifier;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `attempt` (0-based), capped and jittered
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(32) as i32;
    let raw = config.base_delay_ms as f64 * config.multiplier.max(1.0).powi(exponent);
    let capped = raw.min(config.max_delay_ms as f64);

    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
    } else {
        1.0
    };

    Duration::from_millis((capped * factor).max(0.0) as u64)
}

/// Run `op` up to `max_attempts + 1` times. Every attempt passes through the
/// breaker, so retries count toward it. Stops early when the breaker opens
/// or the error is not retryable.
pub async fn retry_with_breaker<T, F, Fut>(
    breaker: &CircuitBreaker,
    config: &RetryConfig,
    classifier: &ErrorClassifier,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.saturating_add(1);
    let mut attempt = 0;

    loop {
        let error = match breaker.call(&mut op).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        let kind = classifier.classify(&error);
        let retryable = kind.action().is_retryable();

        if attempt >= attempts || !retryable || breaker.state() == BreakerState::Open {
            tracing::debug!(
                breaker = breaker.name(),
                attempt,
                ?kind,
                error = %error,
                "Giving up"
            );
            return Err(error);
        }

        let delay = backoff_delay(config, attempt - 1);
        tracing::debug!(
            breaker = breaker.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::error::MeldError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "text",
            BreakerConfig {
                failure_threshold: threshold,
                ..BreakerConfig::default()
            },
        )
    }

    fn refused() -> MeldError {
        MeldError::AdapterUnavailable {
            engine: "text".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = retry(5);
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = RetryConfig {
            jitter: 0.5,
            ..retry(3)
        };
        for _ in 0..50 {
            let delay = backoff_delay(&config, 0).as_millis();
            assert!((50..=150).contains(&delay), "delay {}", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_breaker(&breaker(10), &retry(3), &ErrorClassifier::new(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(refused())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            retry_with_breaker(&breaker(10), &retry(3), &ErrorClassifier::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MeldError::InvalidRequest("empty query".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_stops_retries() {
        let calls = AtomicU32::new(0);
        let breaker = breaker(2);
        let result: Result<()> =
            retry_with_breaker(&breaker, &retry(5), &ErrorClassifier::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(refused())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.snapshot().total_failures, 2);
    }
}
