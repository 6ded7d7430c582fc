//! What an HTTP front end exposes for an admission check.
//!
//! The server itself (routing, listeners, JSON encoding) lives outside this crate; this module
//! pins down the contract of `POST /v1/check_ratelimit/{key}` so every front end answers alike:
//!
//! | outcome                       | status |
//! |-------------------------------|--------|
//! | admitted                      | 200    |
//! | denied, rate exceeded         | 429    |
//! | denied, burst exceeded        | 429    |
//! | any failure                   | 500    |
//! | method other than `POST`      | 405    |
//!
//! The two 429s carry different descriptions and reason codes.

use crate::context::CallContext;
use crate::error::AdmissionError;
use crate::engine::RateLimiter;
use crate::pool::ConnectionPool;
use crate::strategy::WindowStrategy;
use crate::verdict::{DenyReason, Verdict};

/// Route served by [`check_ratelimit`]; `{key}` is the rate-limited identity.
pub const CHECK_RATELIMIT_ROUTE: &str = "/v1/check_ratelimit/{key}";

pub const STATUS_OK: u16 = 200;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

/// Response body: `{"status": ..., "description": ..., "reason": ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CheckResponse {
    pub status: u16,
    pub description: String,
    /// Deny reason code for 429s.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub reason: Option<DenyReason>,
}

impl CheckResponse {
    fn new(status: u16, description: &str, reason: Option<DenyReason>) -> Self {
        Self { status, description: description.to_string(), reason }
    }

    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Admitted => Self::new(STATUS_OK, "ok", None),
            Verdict::Denied(reason @ DenyReason::RateExceeded) => Self::new(
                STATUS_TOO_MANY_REQUESTS,
                "sending too many requests, please slow down",
                Some(reason),
            ),
            Verdict::Denied(reason @ DenyReason::BurstExceeded) => Self::new(
                STATUS_TOO_MANY_REQUESTS,
                "request burst limit exceeded, please slow down",
                Some(reason),
            ),
        }
    }

    /// Failures are reported generically; details go to the log, not the caller.
    pub fn from_error(error: &AdmissionError) -> Self {
        tracing::warn!(error = %error, "admission check failed");
        Self::new(STATUS_INTERNAL_SERVER_ERROR, "internal server error, try after sometime", None)
    }

    pub fn from_outcome(outcome: &Result<Verdict, AdmissionError>) -> Self {
        match outcome {
            Ok(verdict) => Self::from_verdict(*verdict),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn method_not_allowed() -> Self {
        Self::new(STATUS_METHOD_NOT_ALLOWED, "Allowed Methods: POST", None)
    }
}

/// Handle `method /v1/check_ratelimit/{key}`.
pub async fn check_ratelimit<P, S>(
    limiter: &RateLimiter<P, S>,
    ctx: &CallContext,
    method: &str,
    key: &str,
) -> CheckResponse
where
    P: ConnectionPool,
    S: WindowStrategy,
{
    if !method.eq_ignore_ascii_case("POST") {
        return CheckResponse::method_not_allowed();
    }
    CheckResponse::from_outcome(&limiter.allow(ctx, key).await)
}
