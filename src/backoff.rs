//! Backoff curves for conflict retries.
//!
//! Retry index `0` is the initial attempt and never waits; the first retry is index `1`.
//! Exponential delays double per retry from `base` and saturate at the cap (or at
//! [`MAX_BACKOFF`] when uncapped), so large indexes never overflow.
//!
//! ```rust
//! use std::time::Duration;
//! use tollgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(1))
//!     .with_max(Duration::from_millis(8))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(1));
//! assert_eq!(backoff.delay(3), Duration::from_millis(4));
//! assert_eq!(backoff.delay(9), Duration::from_millis(8));
//! ```

use std::fmt;
use std::time::Duration;

/// Hard ceiling on any computed delay. Conflict retries are meant to be short.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max only applies to exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Curve {
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    curve: Curve,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { curve: Curve::Constant(delay.min(MAX_BACKOFF)) }
    }

    /// `base * 2^(retry - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { curve: Curve::Exponential { base, max: None } }
    }

    /// Cap an exponential curve.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.curve {
            Curve::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            Curve::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay to wait before retry number `retry` (0 = initial attempt, no delay).
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        match &self.curve {
            Curve::Constant(delay) => *delay,
            Curve::Exponential { base, max } => {
                let exponent = u32::try_from(retry - 1).unwrap_or(u32::MAX);
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let delay = Duration::from_nanos(nanos as u64);
                max.map_or(delay, |m| delay.min(m))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_millis(5));
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(5));
        assert_eq!(backoff.delay(50), Duration::from_millis(5));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(2));
        assert_eq!(backoff.delay(1), Duration::from_millis(2));
        assert_eq!(backoff.delay(2), Duration::from_millis(4));
        assert_eq!(backoff.delay(4), Duration::from_millis(16));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff =
            Backoff::exponential(Duration::from_millis(1)).with_max(Duration::from_millis(50)).unwrap();
        assert_eq!(backoff.delay(6), Duration::from_millis(32));
        assert_eq!(backoff.delay(7), Duration::from_millis(50));
        assert_eq!(backoff.delay(1_000), Duration::from_millis(50));
    }

    #[test]
    fn huge_retry_index_saturates() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(usize::MAX), MAX_BACKOFF);
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert_eq!(
            Backoff::constant(Duration::from_millis(1)).with_max(Duration::from_millis(5)),
            Err(BackoffError::ConstantDoesNotSupportMax)
        );
        assert_eq!(
            Backoff::exponential(Duration::from_millis(1)).with_max(Duration::ZERO),
            Err(BackoffError::MaxMustBePositive)
        );
        assert!(matches!(
            Backoff::exponential(Duration::from_millis(10)).with_max(Duration::from_millis(5)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }
}
