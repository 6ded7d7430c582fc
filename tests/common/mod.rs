#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tollgate::store::Hash;
use tollgate::{
    BoundedPool, CommitOutcome, ConflictRetry, Dialer, Endpoint, HashWrite, InstantSleeper,
    ManualClock, MemoryConnection, MemoryStore, PoolConfig, RateLimitConfig, RateLimiter,
    StoreConnection, StoreError, WindowUnit,
};

/// A fixed instant well past the epoch, on a whole second.
pub const T0: u64 = 1_700_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn config(limit: u64, burst: u64, window: WindowUnit) -> RateLimitConfig {
    RateLimitConfig::new(limit, burst, window).unwrap()
}

/// Limiter over `dialer` that never really sleeps between conflict retries.
pub fn limiter<D: Dialer>(
    dialer: D,
    clock: &ManualClock,
    config: RateLimitConfig,
) -> RateLimiter<BoundedPool<D>> {
    limiter_with_pool(dialer, clock, config, PoolConfig::builder().build().unwrap())
}

pub fn limiter_with_pool<D: Dialer>(
    dialer: D,
    clock: &ManualClock,
    config: RateLimitConfig,
    pool: PoolConfig,
) -> RateLimiter<BoundedPool<D>> {
    RateLimiter::bounded(dialer, pool, config)
        .with_clock(clock.clone())
        .with_retry(ConflictRetry::builder().with_sleeper(InstantSleeper).build().unwrap())
}

/// Dialer over a [`MemoryStore`] whose connections can be told to lose commits or hang on reads.
#[derive(Debug, Clone)]
pub struct ScriptedStore {
    store: MemoryStore,
    conflicts: Arc<AtomicUsize>,
    stall_reads: Arc<AtomicBool>,
}

impl ScriptedStore {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            conflicts: Arc::new(AtomicUsize::new(0)),
            stall_reads: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The next `n` commits report a conflict without writing.
    pub fn conflict_next(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// While set, `read_hash` never completes.
    pub fn stall_reads(&self, stall: bool) {
        self.stall_reads.store(stall, Ordering::SeqCst);
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl Dialer for ScriptedStore {
    type Connection = ScriptedConnection;

    async fn dial(&self, endpoint: &Endpoint) -> Result<ScriptedConnection, StoreError> {
        Ok(ScriptedConnection { inner: self.store.dial(endpoint).await?, script: self.clone() })
    }
}

pub struct ScriptedConnection {
    inner: MemoryConnection,
    script: ScriptedStore,
}

#[async_trait]
impl StoreConnection for ScriptedConnection {
    async fn ping(&mut self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        self.inner.watch(key).await
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        self.inner.unwatch().await
    }

    async fn read_hash(&mut self, key: &str) -> Result<Hash, StoreError> {
        if self.script.stall_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.read_hash(key).await
    }

    async fn commit(&mut self, write: &HashWrite) -> Result<CommitOutcome, StoreError> {
        let lose = self
            .script
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            self.inner.unwatch().await?;
            return Ok(CommitOutcome::Conflict);
        }
        self.inner.commit(write).await
    }
}
