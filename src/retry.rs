//! Bounded retry of optimistic-write conflicts.
//!
//! A conflict means another process committed to the same key between our watch and our
//! commit; re-running the read-decide-write protocol is always safe. What must not happen is
//! looping forever under sustained contention, so the policy bounds retries two ways:
//! - `max_attempts` counts total protocol runs (initial + retries);
//! - `max_elapsed`, when set, stops retrying once that much time has passed since the first run.
//!
//! Between runs the engine waits `backoff.delay(retry)` randomised by `jitter`, through the
//! injected [`Sleeper`].
//!
//! ```rust
//! use std::time::Duration;
//! use tollgate::{Backoff, ConflictRetry, InstantSleeper, Jitter};
//!
//! let retry = ConflictRetry::builder()
//!     .max_attempts(5)
//!     .backoff(Backoff::constant(Duration::from_millis(2)))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! assert!(retry.allows_retry(4, Duration::ZERO));
//! assert!(!retry.allows_retry(5, Duration::ZERO));
//! assert_eq!(retry.delay(1), Duration::from_millis(2));
//! ```

use crate::error::ConfigError;
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;

/// Default total attempts per check.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Retry budget for conflicting commits.
#[derive(Clone)]
pub struct ConflictRetry {
    max_attempts: usize,
    max_elapsed: Option<Duration>,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for ConflictRetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictRetry")
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_elapsed: None,
            backoff: default_backoff(),
            jitter: Jitter::Full,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

fn default_backoff() -> Backoff {
    let base = Backoff::exponential(Duration::from_millis(1));
    base.clone().with_max(Duration::from_millis(50)).unwrap_or(base)
}

impl ConflictRetry {
    pub fn builder() -> ConflictRetryBuilder {
        ConflictRetryBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Whether another run is allowed after `attempts` runs that all conflicted.
    pub fn allows_retry(&self, attempts: usize, elapsed: Duration) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        match self.max_elapsed {
            Some(budget) => elapsed < budget,
            None => true,
        }
    }

    /// Jittered wait before retry number `retry` (1-based).
    pub fn delay(&self, retry: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(retry))
    }

    /// Sleep through the injected sleeper.
    pub async fn pause(&self, delay: Duration) {
        self.sleeper.sleep(delay).await;
    }
}

/// Builder for [`ConflictRetry`].
pub struct ConflictRetryBuilder {
    inner: ConflictRetry,
}

impl ConflictRetryBuilder {
    pub fn new() -> Self {
        Self { inner: ConflictRetry::default() }
    }

    /// Total runs of the protocol, initial included. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.inner.max_attempts = attempts;
        self
    }

    /// Stop retrying once this much time has passed since the first run.
    pub fn max_elapsed(mut self, budget: Duration) -> Self {
        self.inner.max_elapsed = Some(budget);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.inner.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.inner.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.inner.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<ConflictRetry, ConfigError> {
        if self.inner.max_attempts == 0 {
            return Err(ConfigError::Retry("max_attempts must be > 0 (got 0)".into()));
        }
        if self.inner.max_elapsed == Some(Duration::ZERO) {
            return Err(ConfigError::Retry("max_elapsed must be > 0".into()));
        }
        Ok(self.inner)
    }
}

impl Default for ConflictRetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
