//! Outcome of an admission check.

use std::fmt;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DenyReason {
    /// The window counter is at its limit.
    RateExceeded,
    /// The per-second burst counter is at its limit. Says nothing about the window counter.
    BurstExceeded,
}

impl DenyReason {
    /// Stable reason code.
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::RateExceeded => "rate_exceeded",
            DenyReason::BurstExceeded => "burst_exceeded",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Admitted,
    Denied(DenyReason),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted)
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Verdict::Admitted => None,
            Verdict::Denied(reason) => Some(*reason),
        }
    }
}
