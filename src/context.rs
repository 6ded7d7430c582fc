//! Caller context for admission checks: cancellation plus an optional deadline.
//!
//! Every suspension point of a check (pool acquisition, each store round trip, retry backoff)
//! runs through [`CallContext::run`], so a cancelled or expired context stops the check at the
//! next await instead of letting it complete.

use crate::error::{AdmissionError, CancelCause};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal and deadline carried through one `allow` call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline(Instant::now() + timeout)
    }

    /// Context cancelled through `token` (or any of its parents).
    pub fn with_token(token: CancellationToken) -> Self {
        Self { cancel: token, deadline: None }
    }

    /// Set or tighten the deadline. A later deadline than the current one is ignored.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why this context is already done, if it is.
    pub fn done(&self) -> Option<CancelCause> {
        if self.cancel.is_cancelled() {
            return Some(CancelCause::Cancelled);
        }
        match self.deadline {
            Some(d) if d <= Instant::now() => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` unless the context finishes first, in which case `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = Result<T, AdmissionError>>,
    {
        if let Some(cause) = self.done() {
            return Err(AdmissionError::Cancelled(cause));
        }
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AdmissionError::Cancelled(CancelCause::Cancelled)),
            _ = expired => Err(AdmissionError::Cancelled(CancelCause::DeadlineExceeded)),
            result = fut => result,
        }
    }
}
