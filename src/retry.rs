//! Exponential backoff + a sliding-window `RetryGuard` (spec.md §7, §4.G).
//!
//! Grounded on the teacher's `github/retry.rs` manual backoff loop, kept
//! dependency-free rather than pulling in the teacher's undeclared
//! `tokio-retry` (see DESIGN.md's dependency notes). `RetryGuard` is new,
//! grounded on `original_source/.../workflow_recovery_service.py`'s
//! `should_retry`/fuse-limit checks: a bound on relaunch attempts per
//! issue within a sliding window, used by the reconciler before retrying
//! a dead agent.

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

/// Runs `operation` with exponential backoff. Only errors for which
/// `is_retryable` returns true are retried; anything else (and exhaustion)
/// is returned immediately as-is or wrapped in `RetryExhausted`.
pub async fn with_backoff<F, Fut, T>(config: &BackoffConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!(attempt, max_attempts = config.max_attempts, %err, "retryable operation failed");
                last_err = Some(err);
                if attempt < config.max_attempts {
                    tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
    Err(OrchestratorError::RetryExhausted {
        attempts: config.max_attempts,
        source: Box::new(last_err.expect("at least one attempt runs")),
    })
}

/// Sliding-window fuse limiting relaunch attempts per issue (spec.md §4.G
/// "Retry guard"). Distinct from the orphan-recovery cooldown: the
/// cooldown throttles *how often* a recovery attempt is considered; this
/// guard bounds *how many* attempts succeed within a longer window before
/// the reconciler stops trying altogether.
pub struct RetryGuard {
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    window: chrono::Duration,
    attempts: Mutex<HashMap<String, Vec<chrono::DateTime<chrono::Utc>>>>,
}

impl RetryGuard {
    pub fn new(clock: Arc<dyn Clock>, max_attempts: u32, window_seconds: u64) -> Self {
        Self {
            clock,
            max_attempts,
            window: chrono::Duration::seconds(window_seconds as i64),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when another attempt for `issue_id` is permitted, and
    /// records the attempt as having happened now. Callers should only
    /// call this immediately before actually retrying.
    pub async fn should_retry(&self, issue_id: &str) -> bool {
        let now = self.clock.now();
        let mut attempts = self.attempts.lock().await;
        let entry = attempts.entry(issue_id.to_string()).or_default();
        entry.retain(|t| now - *t <= self.window);

        if entry.len() as u32 >= self.max_attempts {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let config = BackoffConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = AtomicU32::new(0);
        let result = with_backoff(&config, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(OrchestratorError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "transient",
                )))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let config = BackoffConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(OrchestratorError::WorkflowNotFound {
                issue_id: "1".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_last_error() {
        let config = BackoffConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: Result<()> = with_backoff(&config, || async {
            Err(OrchestratorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "down",
            )))
        })
        .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::RetryExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn retry_guard_blocks_after_max_attempts_in_window() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let guard = RetryGuard::new(clock.clone(), 2, 900);
        assert!(guard.should_retry("42").await);
        assert!(guard.should_retry("42").await);
        assert!(!guard.should_retry("42").await);
    }

    #[tokio::test]
    async fn retry_guard_resets_outside_the_window() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let guard = RetryGuard::new(clock.clone(), 1, 900);
        assert!(guard.should_retry("42").await);
        assert!(!guard.should_retry("42").await);
        clock.advance(chrono::Duration::seconds(901));
        assert!(guard.should_retry("42").await);
    }

    #[tokio::test]
    async fn retry_guard_tracks_issues_independently() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let guard = RetryGuard::new(clock, 1, 900);
        assert!(guard.should_retry("1").await);
        assert!(guard.should_retry("2").await);
        assert!(!guard.should_retry("1").await);
    }
}
