//! Wall-clock abstractions used by window strategies and the in-memory store.
//!
//! Counters persisted in a shared store carry epoch timestamps that every process must agree on,
//! so the clock here is a wall clock rather than a monotonic one. Tests drive time explicitly
//! through [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so window rollover can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Seconds since the Unix epoch, truncated.
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1_000
    }
}

/// Clock backed by `SystemTime::now()`.
///
/// A system clock set before the epoch reads as `0` rather than failing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same instant, so a store and several limiters can observe one timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at `millis` since the epoch.
    pub fn at_millis(millis: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(millis)) }
    }

    /// Start the clock at the beginning of epoch second `secs`.
    pub fn at_secs(secs: u64) -> Self {
        Self::at_millis(secs.saturating_mul(1_000))
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| Some(m.saturating_add(delta)));
    }

    /// Jump to an absolute time. Going backwards is allowed to simulate skew between hosts.
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
