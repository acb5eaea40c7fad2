//! Retry Executor
//!
//! Bounded-attempt runner with exponential backoff and jitter. The backoff
//! sleep races the shared cancellation token, so shutdown never waits out a
//! long delay.
//!
//! Only batch persistence goes through here. Chain and signer calls fail fast.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{StoreError, WalletError};
use crate::store::{LedgerBatch, LedgerStore};

/// Delay policy between attempts
pub trait BackoffStrategy: Send + Sync {
    /// Delay to wait after the given failed attempt (1-based)
    fn delay(&self, attempt: u32) -> Duration;
}

/// `min(max, min * 2^(attempt-1)) + uniform(0, max_jitter)`
#[derive(Debug, Clone)]
pub struct ExponentialStrategy {
    pub min: Duration,
    pub max: Duration,
    pub max_jitter: Duration,
}

impl ExponentialStrategy {
    /// Deterministic part of the delay, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.min.saturating_mul(factor).min(self.max)
    }
}

impl BackoffStrategy for ExponentialStrategy {
    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation arrived while waiting between attempts
    Cancelled,
    /// Every attempt failed; carries the last error
    Exhausted { attempts: u32, last: E },
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "retry cancelled"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

/// Run `op` up to `max_attempts` times. The first attempt runs immediately.
pub async fn execute<T, E, F, Fut>(
    cancel: &CancellationToken,
    max_attempts: u32,
    strategy: &dyn BackoffStrategy,
    op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    execute_if(cancel, max_attempts, strategy, |_| true, op).await
}

/// Like [`execute`], but an error rejected by `retryable` ends the run at
/// once and is reported with the attempts made so far.
pub async fn execute_if<T, E, F, Fut, R>(
    cancel: &CancellationToken,
    max_attempts: u32,
    strategy: &dyn BackoffStrategy,
    retryable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts || !retryable(&err) {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = strategy.delay(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Attempt budget plus backoff, built from configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: ExponentialStrategy,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            strategy: ExponentialStrategy {
                min: Duration::from_millis(config.min_delay_ms),
                max: Duration::from_millis(config.max_delay_ms),
                max_jitter: Duration::from_millis(config.max_jitter_ms),
            },
        }
    }

    /// Persist one batch atomically, retrying transient storage failures only
    pub async fn commit(
        &self,
        store: &dyn LedgerStore,
        batch: &LedgerBatch,
        cancel: &CancellationToken,
    ) -> Result<(), WalletError> {
        execute_if(
            cancel,
            self.max_attempts,
            &self.strategy,
            StoreError::is_transient,
            || store.atomic_batch(batch),
        )
        .await
        .map_err(|e: RetryError<StoreError>| match e {
            RetryError::Cancelled => WalletError::Cancelled,
            RetryError::Exhausted { attempts, last } => WalletError::PersistExhausted {
                attempts,
                source: last,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> ExponentialStrategy {
        ExponentialStrategy {
            min: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let s = ExponentialStrategy {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(20_000),
            max_jitter: Duration::from_millis(250),
        };
        assert_eq!(s.base_delay(1), Duration::from_millis(1000));
        assert_eq!(s.base_delay(2), Duration::from_millis(2000));
        assert_eq!(s.base_delay(5), Duration::from_millis(16_000));
        assert_eq!(s.base_delay(6), Duration::from_millis(20_000));
        assert_eq!(s.base_delay(60), Duration::from_millis(20_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let s = ExponentialStrategy {
            min: Duration::from_millis(10),
            max: Duration::from_millis(100),
            max_jitter: Duration::from_millis(5),
        };
        for _ in 0..200 {
            let d = s.delay(1);
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<String>> = execute(&cancel, 5, &fast(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("lock contention #{}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = execute(&cancel, 4, &fast(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {}", n)) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "failure 4");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let _: Result<(), RetryError<String>> = execute(&cancel, 0, &fast(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = execute_if(
            &cancel,
            10,
            &fast(),
            |e: &String| e.starts_with("busy"),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err("busy".to_string())
                    } else {
                        Err("row missing".to_string())
                    }
                }
            },
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "row missing");
            }
            other => panic!("expected early stop, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_commit_stops_on_unknown_withdraw_request() {
        let store = crate::store::MemoryLedgerStore::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            strategy: fast(),
        };
        let mut batch = LedgerBatch::new();
        batch.mark_withdraw_sent(42, "sig");

        let err = policy
            .commit(&store, &batch, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::PersistExhausted { attempts: 1, .. }
        ));
        assert_eq!(store.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_commit_retries_transient_failures() {
        let store = crate::store::MemoryLedgerStore::new();
        store.fail_next_batches(2);
        let policy = RetryPolicy {
            max_attempts: 5,
            strategy: fast(),
        };

        policy
            .commit(&store, &LedgerBatch::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.batch_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_cuts_backoff_short() {
        let cancel = CancellationToken::new();
        let slow = ExponentialStrategy {
            min: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
            max_jitter: Duration::ZERO,
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), RetryError<String>> =
            execute(&cancel, 10, &slow, || async { Err("down".to_string()) }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
