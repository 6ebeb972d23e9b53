use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::browser::BlockingProfile;
use crate::cancel::CancelSignal;
use crate::config::RetrySection;

use super::error::{FetchError, FetchOutcome};
use super::metrics::{self, MetricsHandle};

/// Retry schedule for whole strategy sequences: `base^i` seconds after
/// failed attempt `i`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff_base: u64,
    jitter_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base_seconds.max(1),
            jitter_seconds: config.jitter_seconds,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        Duration::from_secs(self.backoff_base.saturating_pow(exponent))
    }

    /// The final retry switches to the heaviest resource blocking.
    pub fn profile_for(&self, attempt: usize) -> BlockingProfile {
        if self.max_attempts > 1 && attempt + 1 == self.max_attempts {
            BlockingProfile::Aggressive
        } else {
            BlockingProfile::Standard
        }
    }

    pub async fn run<F, Fut, T>(
        &self,
        url: &str,
        cancel: &CancelSignal,
        metrics: &MetricsHandle,
        mut operation: F,
    ) -> FetchOutcome<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        let mut attempt = 0usize;
        let mut always_blocked = true;
        loop {
            let error = match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => error,
            };
            if matches!(error, FetchError::RateLimitCancelled { .. }) {
                return Err(error);
            }
            always_blocked &= matches!(error, FetchError::Blocked { .. });
            attempt += 1;

            if !error.is_transient() || attempt >= self.max_attempts {
                metrics::record(metrics, |m| m.record_failure());
                warn!(url, attempts = attempt, error = %error, "Fetch strategies exhausted");
                if always_blocked {
                    return Err(error);
                }
                return Err(FetchError::AllStrategiesFailed {
                    url: url.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let mut delay = self.delay_for_attempt(attempt - 1);
            if self.jitter_seconds > 0 {
                let jitter = rand::thread_rng().gen_range(0..=self.jitter_seconds);
                delay += Duration::from_secs(jitter);
            }
            metrics::record(metrics, |m| m.record_retry());
            warn!(
                url,
                attempt,
                delay_seconds = delay.as_secs(),
                error = %error,
                "Fetch attempt failed; retry scheduled"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::cancelled("retry backoff")),
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetrySection::default())
    }

    #[test]
    fn exponential_schedule() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn last_attempt_uses_aggressive_blocking() {
        let policy = policy();
        assert_eq!(policy.profile_for(0), BlockingProfile::Standard);
        assert_eq!(policy.profile_for(1), BlockingProfile::Standard);
        assert_eq!(policy.profile_for(2), BlockingProfile::Aggressive);
        let single = RetryPolicy::new(&RetrySection {
            max_attempts: 1,
            ..RetrySection::default()
        });
        assert_eq!(single.profile_for(0), BlockingProfile::Standard);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let handle = metrics::new_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let outcome = policy()
            .run("https://a.test/", &CancelSignal::never(), &handle, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(FetchError::Timeout("GET https://a.test/".into()))
                    } else {
                        Ok("calendar")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, "calendar");
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(metrics::snapshot(&handle).retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_immediately() {
        let handle = metrics::new_handle();
        let err = policy()
            .run("https://a.test/x", &CancelSignal::never(), &handle, |_| async {
                Err::<(), _>(FetchError::Status {
                    url: "https://a.test/x".into(),
                    status: 404,
                })
            })
            .await
            .unwrap_err();
        match err {
            FetchError::AllStrategiesFailed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rejection_surfaces_as_blocked() {
        let handle = metrics::new_handle();
        let err = policy()
            .run("https://a.test/", &CancelSignal::never(), &handle, |_| async {
                Err::<(), _>(FetchError::Blocked {
                    url: "https://a.test/".into(),
                    status: 403,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Blocked { status: 403, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff() {
        let handle = metrics::new_handle();
        let (cancel, signal) = crate::cancel::cancel_pair();
        let task = tokio::spawn(async move {
            policy()
                .run("https://a.test/", &signal, &handle, |_| async {
                    Err::<(), _>(FetchError::Timeout("GET".into()))
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FetchError::RateLimitCancelled { .. }));
    }
}
