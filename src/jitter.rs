//! Jitter for conflict-retry delays
//!
//! Processes that lose the same optimistic race would otherwise retry in lockstep and collide
//! again. Jitter spreads them out:
//! - `None`: exact backoff delay, for tests.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.
//!
//! Randomness is drawn at microsecond granularity from `rand`'s thread-local RNG;
//! `apply_with_rng` takes a seeded RNG for deterministic tests.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay as is
    None,
    /// Random between 0 and delay
    #[default]
    Full,
    /// Random between delay/2 and delay
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        if micros == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_micros(rng.random_range(0..=micros)),
            Jitter::Equal => Duration::from_micros(rng.random_range(micros / 2..=micros)),
        }
    }
}
