//! Connection pooling for the shared store.
//!
//! The engine depends only on [`ConnectionPool`]: hand out one exclusive connection, take it back
//! when the lease is dropped. [`BoundedPool`] is the stock implementation:
//! - at most `max_active` leases exist at once, enforced with a semaphore;
//! - up to `max_idle` released connections are kept for reuse, newest first;
//! - idle connections older than `idle_timeout` are closed rather than reused;
//! - with `test_on_borrow`, a reused connection is pinged first and replaced if the ping fails;
//! - a lease marked broken is closed on release instead of going back to the idle set.

use crate::config::{Endpoint, PoolConfig};
use crate::error::{PoolError, StoreError};
use crate::store::{CommitOutcome, Hash, HashWrite, StoreConnection};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Opens new connections to the store.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: StoreConnection + 'static;

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Connection, StoreError>;
}

/// Source of exclusive store connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// A leased connection; returned to the pool when dropped.
    type Connection: StoreConnection;

    async fn acquire(&self) -> Result<Self::Connection, PoolError>;
}

struct IdleConnection<C> {
    conn: C,
    since: Instant,
}

struct IdleSet<C> {
    max_idle: usize,
    idle_timeout: Duration,
    queue: Mutex<VecDeque<IdleConnection<C>>>,
}

impl<C> IdleSet<C> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recently released connection that has not idled out. Stale ones are dropped.
    fn take_fresh(&self) -> Option<C> {
        let mut queue = self.queue();
        while let Some(idle) = queue.pop_back() {
            if idle.since.elapsed() < self.idle_timeout {
                return Some(idle.conn);
            }
            tracing::debug!(idle_for = ?idle.since.elapsed(), "closing idle store connection");
        }
        None
    }

    fn put(&self, conn: C) {
        let mut queue = self.queue();
        queue.push_back(IdleConnection { conn, since: Instant::now() });
        while queue.len() > self.max_idle {
            queue.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.queue().len()
    }

    fn clear(&self) {
        self.queue().clear();
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
}

/// Semaphore-bounded pool over a [`Dialer`].
pub struct BoundedPool<D: Dialer> {
    dialer: D,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Arc<IdleSet<D::Connection>>,
}

impl<D: Dialer> std::fmt::Debug for BoundedPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<D: Dialer> BoundedPool<D> {
    pub fn new(dialer: D, config: PoolConfig) -> Self {
        let idle = Arc::new(IdleSet {
            max_idle: config.max_idle(),
            idle_timeout: config.idle_timeout(),
            queue: Mutex::new(VecDeque::new()),
        });
        Self { permits: Arc::new(Semaphore::new(config.max_active())), dialer, config, idle }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.permits.available_permits();
        PoolStats {
            active: self.config.max_active().saturating_sub(available),
            idle: self.idle.len(),
        }
    }

    /// Close idle connections and refuse further acquisitions. Outstanding leases are closed
    /// as they are released.
    pub fn close(&self) {
        self.permits.close();
        self.idle.clear();
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        if self.permits.is_closed() {
            return Err(PoolError::Closed);
        }
        match self.config.acquire_timeout() {
            None => self.permits.clone().try_acquire_owned().map_err(|e| match e {
                tokio::sync::TryAcquireError::Closed => PoolError::Closed,
                tokio::sync::TryAcquireError::NoPermits => {
                    PoolError::Exhausted { max_active: self.config.max_active() }
                }
            }),
            Some(wait) => tokio::time::timeout(wait, self.permits.clone().acquire_owned())
                .await
                .map_err(|_| PoolError::Timeout(wait))?
                .map_err(|_| PoolError::Closed),
        }
    }
}

#[async_trait]
impl<D: Dialer> ConnectionPool for BoundedPool<D> {
    type Connection = Pooled<D::Connection>;

    async fn acquire(&self) -> Result<Pooled<D::Connection>, PoolError> {
        let permit = self.permit().await?;

        while let Some(mut conn) = self.idle.take_fresh() {
            if !self.config.test_on_borrow() {
                return Ok(Pooled::new(conn, permit, self.idle.clone()));
            }
            match conn.ping().await {
                Ok(()) => {
                    tracing::trace!("reusing idle store connection");
                    return Ok(Pooled::new(conn, permit, self.idle.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "idle store connection failed health check"),
            }
        }

        let endpoint = self.config.endpoint();
        let conn = self.dialer.dial(endpoint).await.map_err(|e| {
            tracing::warn!(address = %endpoint.address, error = %e, "store dial failed");
            PoolError::Dial(e)
        })?;
        tracing::debug!(address = %endpoint.address, "dialed store connection");
        Ok(Pooled::new(conn, permit, self.idle.clone()))
    }
}

/// A leased connection. Dropping it releases the lease.
pub struct Pooled<C: StoreConnection + 'static> {
    conn: Option<C>,
    broken: bool,
    idle: Arc<IdleSet<C>>,
    permit: OwnedSemaphorePermit,
}

impl<C: StoreConnection + 'static> Pooled<C> {
    fn new(conn: C, permit: OwnedSemaphorePermit, idle: Arc<IdleSet<C>>) -> Self {
        Self { conn: Some(conn), broken: false, idle, permit }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn conn(&mut self) -> &mut C {
        // Only `Drop` takes the connection out.
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: StoreConnection + 'static> Drop for Pooled<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || self.permit.semaphore().is_closed() {
                tracing::debug!("closing store connection instead of returning it to the pool");
            } else {
                self.idle.put(conn);
            }
        }
    }
}

impl<C: StoreConnection + 'static> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: StoreConnection + 'static> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn()
    }
}

#[async_trait]
impl<C: StoreConnection + 'static> StoreConnection for Pooled<C> {
    async fn ping(&mut self) -> Result<(), StoreError> {
        self.conn().ping().await
    }

    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        self.conn().watch(key).await
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        self.conn().unwatch().await
    }

    async fn read_hash(&mut self, key: &str) -> Result<Hash, StoreError> {
        self.conn().read_hash(key).await
    }

    async fn commit(&mut self, write: &HashWrite) -> Result<CommitOutcome, StoreError> {
        self.conn().commit(write).await
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }
}
