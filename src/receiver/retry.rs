//! Bounded exponential backoff shared by the receivers.

use std::thread;
use std::time::Duration;

use log::warn;

use super::DeliveryError;

/// Default total number of attempts (one initial try plus five retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
/// Default increment of the backoff sequence.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// How many times to try and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts, sleeping the calling thread between attempts.
    pub fn run<T>(
        &self,
        what: &str,
        op: impl FnMut() -> Result<T, DeliveryError>,
    ) -> Result<T, DeliveryError> {
        retry_with_sleep(self, what, thread::sleep, op)
    }
}

/// Delay sequence `t(1) = base`, `t(n+1) = 2 * t(n) + base`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: Duration::ZERO,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).saturating_add(self.base);
        self.current
    }
}

/// [`RetryPolicy::run`] with an injectable sleep function.
pub fn retry_with_sleep<T>(
    policy: &RetryPolicy,
    what: &str,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut() -> Result<T, DeliveryError>,
) -> Result<T, DeliveryError> {
    let mut backoff = Backoff::new(policy.base);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(
                    "{what} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transport_error() -> DeliveryError {
        DeliveryError::Transport("connection refused".into())
    }

    #[rstest]
    fn always_failing_operation_is_attempted_six_times() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let mut delays = Vec::new();
        let result: Result<(), _> = retry_with_sleep(
            &policy,
            "test delivery",
            |d| delays.push(d),
            || {
                calls += 1;
                Err(transport_error())
            },
        );

        assert_eq!(calls, 6);
        assert!(matches!(
            result,
            Err(DeliveryError::RetriesExhausted { attempts: 6, .. })
        ));
        let ms: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![10, 30, 70, 150, 310]);
        for pair in delays.windows(2) {
            assert_eq!(pair[1], pair[0] * 2 + policy.base);
        }
    }

    #[rstest]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let mut sleeps = 0;
        let result = retry_with_sleep(
            &RetryPolicy::default(),
            "test delivery",
            |_| sleeps += 1,
            || {
                calls += 1;
                if calls < 3 { Err(transport_error()) } else { Ok(calls) }
            },
        );
        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(sleeps, 2);
    }

    #[rstest]
    fn permanent_failures_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_sleep(
            &RetryPolicy::default(),
            "test delivery",
            |_| panic!("must not sleep"),
            || {
                calls += 1;
                Err(DeliveryError::Status {
                    status: 400,
                    retryable: false,
                })
            },
        );
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(DeliveryError::Status { status: 400, .. })));
    }

    #[rstest]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base: Duration::from_millis(10),
        };
        let result: Result<(), _> =
            retry_with_sleep(&policy, "test", |_| panic!("must not sleep"), || {
                Err(transport_error())
            });
        assert!(matches!(
            result,
            Err(DeliveryError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[rstest]
    fn backoff_sequence_follows_recurrence() {
        let mut backoff = Backoff::new(Duration::from_millis(5));
        let seq: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(seq, vec![5, 15, 35, 75]);
    }
}
