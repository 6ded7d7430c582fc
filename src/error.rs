//! Error types for admission checks
//!
//! Denials are not errors: `allow` reports them as [`Verdict::Denied`](crate::Verdict). The
//! types here cover failures, split by where they arise:
//! - [`StoreError`]: a round trip to the shared store failed or returned something undecodable.
//! - [`PoolError`]: no connection could be obtained.
//! - [`AdmissionError`]: what a caller of `allow` sees.
//!
//! Optimistic-write conflicts never surface directly; the engine retries them and reports
//! [`AdmissionError::ServerBusy`] once its retry budget is spent.
use std::time::Duration;

/// Failure talking to the shared counter store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached (dial failure, broken socket, I/O timeout).
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// The store refused the credentials supplied at dial time.
    #[error("store authentication failed: {0}")]
    Auth(String),
    /// A persisted record could not be decoded.
    #[error("corrupt record at '{key}': field '{field}' {reason}")]
    Corrupt { key: String, field: &'static str, reason: String },
    /// The store answered with something the protocol does not allow.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Failure obtaining a connection from the pool.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// Every connection is in use and the pool does not wait.
    #[error("connection pool exhausted ({max_active} active)")]
    Exhausted { max_active: usize },
    /// Waited for a free connection and none became available in time.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),
    /// A fresh connection could not be established.
    #[error("dial failed: {0}")]
    Dial(#[source] StoreError),
    /// The pool has been closed.
    #[error("connection pool closed")]
    Closed,
}

/// Why an in-flight check stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Cancelled => f.write_str("cancelled"),
            CancelCause::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Failure of an admission check. Denials are reported through `Verdict`, not here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdmissionError {
    /// No connection to the store (pool exhausted or store unreachable at dial time).
    #[error("connection error: {0}")]
    Connection(#[from] PoolError),
    /// A store round trip failed after a connection was obtained.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Optimistic writes kept conflicting until the retry budget ran out.
    #[error("server is busy processing other requests: gave up after {attempts} conflicting attempts in {elapsed:?}")]
    ServerBusy { attempts: usize, elapsed: Duration },
    /// The caller cancelled or its deadline passed.
    #[error("admission check {0}")]
    Cancelled(CancelCause),
}

impl AdmissionError {
    /// Connection-level failure: the pool had nothing to give, or the store was unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Store(StoreError::Unreachable(_)))
    }

    /// Conflict retries were exhausted.
    pub fn is_server_busy(&self) -> bool {
        matches!(self, Self::ServerBusy { .. })
    }

    /// Cancelled or past deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Whether the connection in use may hold half-finished protocol state and must not be
    /// handed to another caller.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Cancelled(_))
    }
}

/// Invalid construction-time configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("limit must be > 0 (got {0})")]
    InvalidLimit(u64),
    #[error("burst_limit must be > 0 (got {0})")]
    InvalidBurstLimit(u64),
    #[error("valid window units are 'second', 'minute' and 'hour' (got '{0}')")]
    InvalidWindowUnit(String),
    #[error("idle_timeout must be > 0")]
    InvalidIdleTimeout,
    #[error("max_active must be > 0")]
    InvalidMaxActive,
    #[error("max_idle ({max_idle}) must not exceed max_active ({max_active})")]
    MaxIdleExceedsActive { max_idle: usize, max_active: usize },
    #[error("store address must not be empty")]
    EmptyAddress,
    #[error("retry: {0}")]
    Retry(String),
}
