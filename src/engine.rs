//! The rate decision engine.
//!
//! `allow` runs an optimistic read-decide-write protocol against the shared store:
//!
//! 1. lease a connection from the pool (failure is final: no retry);
//! 2. `watch` the key;
//! 3. read its record;
//! 4. let the [`WindowStrategy`] decide (open a fresh record, or advance the one read);
//! 5. on denial, `unwatch` and return without writing;
//! 6. on admission, commit the new record conditionally; a conflict means another process
//!    wrote the key after step 2, so go back to step 2.
//!
//! Correctness across processes rests entirely on the store rejecting the loser of every race
//! at step 6: the check and the write are atomic from the store's point of view, so the window
//! counter never overshoots its limit. Nothing in-process is locked.
//!
//! Retries are bounded by [`ConflictRetry`]; once spent, the call fails with
//! [`AdmissionError::ServerBusy`]. Every await runs under the caller's [`CallContext`]. The lease
//! is released on every exit path; a connection left mid-protocol by an error or cancellation is
//! marked broken so the pool closes it instead of reusing it.

use crate::clock::{Clock, SystemClock};
use crate::config::{PoolConfig, RateLimitConfig};
use crate::context::CallContext;
use crate::error::AdmissionError;
use crate::pool::{BoundedPool, ConnectionPool, Dialer};
use crate::retry::ConflictRetry;
use crate::store::{CommitOutcome, HashRecord, HashWrite, StoreConnection};
use crate::strategy::{Decision, FixedWindow, WindowStrategy};
use crate::verdict::Verdict;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

enum Attempt {
    Settled(Verdict),
    Conflict,
}

/// Distributed admission controller for one rate-limit policy.
pub struct RateLimiter<P, S = FixedWindow> {
    pool: P,
    strategy: S,
    clock: Arc<dyn Clock>,
    retry: ConflictRetry,
    key_prefix: Option<String>,
}

impl<P, S: std::fmt::Debug> std::fmt::Debug for RateLimiter<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("strategy", &self.strategy)
            .field("clock", &self.clock)
            .field("retry", &self.retry)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl<D: Dialer> RateLimiter<BoundedPool<D>, FixedWindow> {
    /// Fixed-window limiter over a [`BoundedPool`] dialing through `dialer`.
    pub fn bounded(dialer: D, pool: PoolConfig, config: RateLimitConfig) -> Self {
        Self::new(BoundedPool::new(dialer, pool), config)
    }
}

impl<P: ConnectionPool> RateLimiter<P, FixedWindow> {
    /// Fixed-window limiter with a burst sub-window.
    pub fn new(pool: P, config: RateLimitConfig) -> Self {
        Self::with_strategy(pool, FixedWindow::new(config))
    }
}

impl<P: ConnectionPool, S: WindowStrategy> RateLimiter<P, S> {
    /// Limiter deciding with `strategy`, on the system clock and the default retry budget.
    pub fn with_strategy(pool: P, strategy: S) -> Self {
        Self {
            pool,
            strategy,
            clock: Arc::new(SystemClock),
            retry: ConflictRetry::default(),
            key_prefix: None,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_retry(mut self, retry: ConflictRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Store keys become `prefix:key`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Key under which `key`'s record lives in the store.
    pub fn store_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// Decide whether the current request for `key` is admitted.
    pub async fn allow(&self, ctx: &CallContext, key: &str) -> Result<Verdict, AdmissionError> {
        let store_key = self.store_key(key);
        let span = tracing::debug_span!("allow", key = %store_key);
        self.check(ctx, &store_key).instrument(span).await
    }

    async fn check(&self, ctx: &CallContext, key: &str) -> Result<Verdict, AdmissionError> {
        let mut conn = ctx.run(async { self.pool.acquire().await.map_err(AdmissionError::from) }).await?;
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(ctx, &mut conn, key).await {
                Ok(Attempt::Settled(verdict)) => return Ok(verdict),
                Ok(Attempt::Conflict) => {
                    let elapsed = started.elapsed();
                    if !self.retry.allows_retry(attempts, elapsed) {
                        tracing::warn!(attempts, ?elapsed, "giving up after repeated write conflicts");
                        return Err(AdmissionError::ServerBusy { attempts, elapsed });
                    }
                    let delay = self.retry.delay(attempts);
                    tracing::debug!(attempt = attempts, ?delay, "write conflict, retrying");
                    ctx.run(async {
                        self.retry.pause(delay).await;
                        Ok::<(), AdmissionError>(())
                    })
                    .await?;
                }
                Err(e) => {
                    if e.poisons_connection() {
                        conn.mark_broken();
                    }
                    tracing::debug!(error = %e, "admission check failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &CallContext,
        conn: &mut P::Connection,
        key: &str,
    ) -> Result<Attempt, AdmissionError> {
        ctx.run(async { conn.watch(key).await.map_err(AdmissionError::from) }).await?;
        let hash = ctx.run(async { conn.read_hash(key).await.map_err(AdmissionError::from) }).await?;

        let now = self.clock.now_secs();
        let decision = if hash.is_empty() {
            self.strategy.open(now)
        } else {
            let state = S::State::from_hash(key, &hash)?;
            self.strategy.advance(state, now)
        };

        match decision {
            Decision::Deny(reason) => {
                ctx.run(async { conn.unwatch().await.map_err(AdmissionError::from) }).await?;
                tracing::debug!(%reason, "request denied");
                Ok(Attempt::Settled(Verdict::Denied(reason)))
            }
            Decision::Admit { state, arm_ttl } => {
                let write = HashWrite {
                    key: key.to_string(),
                    fields: state.to_hash(),
                    expire: arm_ttl.then(|| self.strategy.ttl()),
                };
                match ctx.run(async { conn.commit(&write).await.map_err(AdmissionError::from) }).await? {
                    CommitOutcome::Applied => Ok(Attempt::Settled(Verdict::Admitted)),
                    CommitOutcome::Conflict => Ok(Attempt::Conflict),
                }
            }
        }
    }
}
