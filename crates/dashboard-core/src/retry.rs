//! ============================================================================
//! Retry Logic - Exponential Backoff & Error Classification
//! ============================================================================
//! Used when resolving appchain endpoints and polling remote confirmation
//! sources:
//! - Exponential backoff with jitter between attempts
//! - Error classification (retryable vs permanent vs rate limited)
//! ============================================================================

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ReconcileConfig;

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify an RPC error message
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
        return ErrorKind::RateLimited;
    }

    // Missing contracts / methods end the current retry round
    if lower.contains("unknown_account")
        || lower.contains("unknown account")
        || lower.contains("does not exist")
        || lower.contains("methodnotfound")
        || lower.contains("method not found")
        || lower.contains("codedoesnotexist")
        || lower.contains("invalid response")
        || lower.contains("no rpc endpoint")
    {
        return ErrorKind::Permanent;
    }

    // Default to retryable for connection errors and anything unknown
    ErrorKind::Retryable
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &ReconcileConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // Add random jitter (0-50% of delay)
        let jitter_factor = 1.0 + rand::random::<f64>() * 0.5;
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, or `max_connect_retries` is used up.
/// Returns the last error message on failure.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &ReconcileConfig,
    label: &str,
    mut op: F,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let attempts = config.max_connect_retries.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = calculate_delay(attempt - 1, config);
            debug!("{}: retry attempt {} after {:?}", label, attempt, delay);
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let kind = classify_error(&e);
                warn!("{}: attempt {} failed ({:?}): {}", label, attempt + 1, kind, e);
                match kind {
                    ErrorKind::Permanent => return Err(e),
                    ErrorKind::RateLimited => {
                        sleep(Duration::from_millis(config.max_delay_ms)).await;
                    }
                    ErrorKind::Retryable => {}
                }
                last_error = e;
            }
        }
    }

    Err(format!(
        "{}: max retries ({}) exceeded. Last error: {}",
        label, attempts, last_error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> ReconcileConfig {
        ReconcileConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(
            classify_error("RPC error: Server error: account barnacle.registry does not exist while viewing"),
            ErrorKind::Permanent
        );
        assert_eq!(classify_error("UNKNOWN_ACCOUNT"), ErrorKind::Permanent);
        assert_eq!(classify_error("MethodNotFound"), ErrorKind::Permanent);
        assert_eq!(classify_error("connection refused"), ErrorKind::Retryable);
        assert_eq!(classify_error("unknown error xyz"), ErrorKind::Retryable);
    }

    #[test]
    fn test_calculate_delay() {
        let config = no_jitter();
        assert_eq!(calculate_delay(0, &config), Duration::from_millis(500));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(4000));
        // Capped at max_delay_ms
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(10000));
        assert_eq!(calculate_delay(200, &config), Duration::from_millis(10000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = ReconcileConfig {
            base_delay_ms: 1000,
            ..Default::default()
        };
        for _ in 0..10 {
            let delay = calculate_delay(0, &config);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_with_backoff(&no_jitter(), "connect", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("connection reset".to_string())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = retry_with_backoff(&no_jitter(), "resolve", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("UNKNOWN_ACCOUNT".to_string())
        })
        .await;
        assert_eq!(result, Err("UNKNOWN_ACCOUNT".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let config = ReconcileConfig {
            max_connect_retries: 3,
            ..no_jitter()
        };
        let result: Result<(), String> =
            retry_with_backoff(&config, "connect", || async { Err("timeout".to_string()) }).await;
        let err = result.unwrap_err();
        assert!(err.contains("max retries (3)"));
        assert!(err.contains("timeout"));
    }
}
