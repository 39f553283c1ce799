//! Retry policy: decides backoff delays and retry exhaustion.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Default number of retries before a task is failed for good.
pub const DEFAULT_RETRY_LIMIT: u32 = 5;

/// Exponent cap of the default backoff: delays never exceed 2^7 seconds.
pub const MAX_BACKOFF_EXPONENT: u32 = 7;

/// Maps a failure count to the delay before the next attempt.
///
/// `fail_count` is the count *after* the failure being handled (first
/// failure = 1). The delay may be computed asynchronously.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn delay(&self, fail_count: u32) -> Duration;
}

/// Randomized exponential backoff: whole seconds drawn uniformly from
/// `[1, 2^min(fail_count, cap)]`, spreading retries of many tasks that failed
/// together.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialJitter {
    pub max_exponent: u32,
}

impl Default for ExponentialJitter {
    fn default() -> Self {
        Self {
            max_exponent: MAX_BACKOFF_EXPONENT,
        }
    }
}

impl ExponentialJitter {
    /// Upper bound (inclusive, seconds) for a given failure count.
    pub fn upper_bound_secs(&self, fail_count: u32) -> u64 {
        1u64 << fail_count.min(self.max_exponent)
    }
}

#[async_trait]
impl Backoff for ExponentialJitter {
    async fn delay(&self, fail_count: u32) -> Duration {
        let upper = self.upper_bound_secs(fail_count);
        let secs = rand::thread_rng().gen_range(1..=upper);
        Duration::from_secs(secs)
    }
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl Backoff for FixedDelay {
    async fn delay(&self, _fail_count: u32) -> Duration {
        self.0
    }
}

/// Closure-backed backoff, see [`backoff_fn`].
pub struct BackoffFn<F>(F);

/// Wrap a plain function of the failure count.
///
/// ```ignore
/// let backoff = backoff_fn(|fail_count| Duration::from_secs(u64::from(fail_count) * 60));
/// ```
pub fn backoff_fn<F>(f: F) -> BackoffFn<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    BackoffFn(f)
}

#[async_trait]
impl<F> Backoff for BackoffFn<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    async fn delay(&self, fail_count: u32) -> Duration {
        (self.0)(fail_count)
    }
}

/// Outcome of applying the policy to one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stay pending, become eligible again at `process_at`.
    Retry {
        fail_count: u32,
        process_at: DateTime<Utc>,
    },
    /// Retries exhausted; terminal.
    Fail { fail_count: u32 },
}

impl Transition {
    pub fn fail_count(&self) -> u32 {
        match *self {
            Transition::Retry { fail_count, .. } | Transition::Fail { fail_count } => fail_count,
        }
    }
}

/// Per task type retry policy.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Number of retries allowed. `0` fails a task on its first failure.
    pub retry_limit: u32,

    pub backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            backoff: Arc::new(ExponentialJitter::default()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(retry_limit: u32, backoff: impl Backoff + 'static) -> Self {
        Self {
            retry_limit,
            backoff: Arc::new(backoff),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            retry_limit: 0,
            ..Default::default()
        }
    }

    /// Exhausted once the post-increment count exceeds the limit; reaching the
    /// limit exactly still allows one more attempt.
    pub fn is_exhausted(&self, fail_count: u32) -> bool {
        fail_count > self.retry_limit
    }

    /// Decide the transition for a task that just failed with
    /// `current_fail_count` failures recorded before this attempt.
    pub async fn next_transition(&self, current_fail_count: u32, now: DateTime<Utc>) -> Transition {
        let fail_count = current_fail_count.saturating_add(1);
        if self.is_exhausted(fail_count) {
            return Transition::Fail { fail_count };
        }

        let delay = self.backoff.delay(fail_count).await;
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let process_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Transition::Retry {
            fail_count,
            process_at,
        }
    }
}
