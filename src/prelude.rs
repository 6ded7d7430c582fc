//! Convenient re-exports for common Tollgate types.
pub use crate::{
    backoff::Backoff,
    config::{PoolConfig, RateLimitConfig, WindowUnit},
    context::CallContext,
    engine::RateLimiter,
    error::{AdmissionError, CancelCause, ConfigError},
    jitter::Jitter,
    middleware::{AdmissionLayer, GateError},
    retry::ConflictRetry,
    strategy::{FixedWindow, WindowStrategy},
    verdict::{DenyReason, Verdict},
};
