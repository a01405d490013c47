//! Bounded-retry executor with exponential backoff and jitter.
//!
//! Every remote call the pipeline makes goes through a [`RetryPolicy`].
//! Each call gets an independent budget: no backoff state is shared between
//! calls. Delays intentionally block the current run; the pipeline is
//! deliberately slow against rate-sensitive upstreams.

use std::future::Future;
use std::time::{Duration, SystemTime};

/// The wrapped call failed `attempts` times; `cause` is the final error.
///
/// Callers must treat this as terminal for the current item or page, not as
/// something to retry at a higher level within the same run.
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub cause: E,
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetriesExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.cause)
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for RetriesExhausted<E> {}

/// Random-ish delay in 0–1s without carrying an RNG around.
fn default_jitter() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(nanos % 1000)
}

/// Retry strategy: bounded attempts, exponential backoff, additive jitter.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    /// Optional delay honored before the first attempt; some upstream calls
    /// are deliberately throttled.
    preemptive_delay: Option<Duration>,
    jitter: fn() -> Duration,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("preemptive_delay", &self.preemptive_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            preemptive_delay: None,
            jitter: default_jitter,
        }
    }

    /// Delay before the first attempt.
    pub fn with_preemptive_delay(mut self, delay: Duration) -> Self {
        self.preemptive_delay = Some(delay);
        self
    }

    /// Replace the jitter function (tests use a zero jitter).
    pub fn with_jitter(mut self, jitter: fn() -> Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt` (1-based; the first attempt has no
    /// backoff). The base doubles per failure, jitter is added on top.
    fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = attempt.saturating_sub(2).min(31);
        self.base_delay * 2u32.saturating_pow(doublings) + (self.jitter)()
    }

    /// Run `call` until it succeeds or the attempt budget is spent.
    pub async fn execute<T, E, F, Fut>(&self, mut call: F) -> Result<T, RetriesExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(delay) = self.preemptive_delay {
            tokio::time::sleep(delay).await;
        }

        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(cause) if attempt >= self.max_attempts => {
                    return Err(RetriesExhausted { cause, attempts: attempt });
                }
                Err(_) => {
                    attempt += 1;
                    tokio::time::sleep(self.delay_before_attempt(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> Duration {
        Duration::ZERO
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO).with_jitter(no_jitter)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        // 2 failures with a budget of 5: exactly 3 attempts total
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = fast_policy(5)
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n <= 2 { Err("boom") } else { Ok(n) } }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("always") }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.cause, "always");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_delays_non_decreasing() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100)).with_jitter(no_jitter);

        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(400));

        let mut prev = Duration::ZERO;
        for attempt in 1..=6 {
            let delay = policy.delay_before_attempt(attempt);
            assert!(delay >= prev);
            prev = delay;
        }
    }

    #[tokio::test]
    async fn test_single_attempt_minimum() {
        // max_attempts of 0 is bumped to 1
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(0)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("nope") }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
