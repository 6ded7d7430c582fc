//! Window strategies: the pure decision step of an admission check.
//!
//! The engine owns the transaction scaffolding (connection, watch, read, conditional commit,
//! retry). A [`WindowStrategy`] owns only the arithmetic: given the record it read (or nothing)
//! and the current second, admit with a new record or deny with a reason. Strategies never
//! touch the store or the clock, which keeps them synchronous and trivially testable.

use crate::config::{RateLimitConfig, WindowUnit};
use crate::store::{Counter, HashRecord};
use crate::verdict::DenyReason;
use std::time::Duration;

/// Outcome of one decision step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<S> {
    /// Persist `state`. `arm_ttl` asks the commit to (re)arm the key's TTL.
    Admit { state: S, arm_ttl: bool },
    /// Deny without writing anything.
    Deny(DenyReason),
}

/// Admission arithmetic over a per-key record.
pub trait WindowStrategy: Send + Sync + std::fmt::Debug {
    type State: HashRecord + Send + std::fmt::Debug;

    /// TTL armed when a key's window opens.
    fn ttl(&self) -> Duration;

    /// Decide for a key with no live record.
    fn open(&self, now_secs: u64) -> Decision<Self::State>;

    /// Decide for a key whose record was read as `state`.
    fn advance(&self, state: Self::State, now_secs: u64) -> Decision<Self::State>;
}

/// Fixed window counted by the key's TTL, with a one-second burst sub-window inside it.
///
/// The window opens with the first admission for a key and closes when the key expires; no
/// later write extends it. The burst sub-window resets whenever a request lands in a later
/// wall-clock second than the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    limit: u64,
    burst_limit: u64,
    window: WindowUnit,
}

impl FixedWindow {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { limit: config.limit(), burst_limit: config.burst_limit(), window: config.window() }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn burst_limit(&self) -> u64 {
        self.burst_limit
    }
}

impl From<RateLimitConfig> for FixedWindow {
    fn from(config: RateLimitConfig) -> Self {
        Self::new(config)
    }
}

impl WindowStrategy for FixedWindow {
    type State = Counter;

    fn ttl(&self) -> Duration {
        self.window.ttl()
    }

    fn open(&self, now_secs: u64) -> Decision<Counter> {
        // Validated limits are >= 1, so a fresh window always admits.
        Decision::Admit { state: Counter::opened_at(now_secs), arm_ttl: true }
    }

    fn advance(&self, mut counter: Counter, now_secs: u64) -> Decision<Counter> {
        // Burst first: a request failing both checks reports BurstExceeded.
        if now_secs > counter.last_updated {
            counter.burst_count = 1;
            counter.last_updated = now_secs;
        } else if counter.burst_count >= self.burst_limit {
            return Decision::Deny(DenyReason::BurstExceeded);
        } else {
            counter.burst_count += 1;
        }

        if counter.count >= self.limit {
            return Decision::Deny(DenyReason::RateExceeded);
        }
        counter.count += 1;
        Decision::Admit { state: counter, arm_ttl: false }
    }
}
