//! In-process store with the watch/commit and TTL semantics of the shared store.
//!
//! Every [`MemoryConnection`] operation yields to the scheduler before touching state, standing in
//! for a network round trip, so concurrent checks against one key genuinely interleave and race
//! on commit. Clones of a [`MemoryStore`] share one keyspace; several limiters built over
//! clones behave like independent processes sharing one server.
//!
//! Expiry counts as a modification for watchers: an expired key leaves a tombstone version
//! behind, so a watch taken before the key was created still conflicts if the key came and went
//! before the commit.

use crate::clock::Clock;
use crate::config::Endpoint;
use crate::error::StoreError;
use crate::pool::Dialer;
use crate::store::{CommitOutcome, Hash, HashWrite, StoreConnection};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct Entry {
    hash: Hash,
    version: u64,
    expires_at_millis: Option<u64>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    /// Version stamped on a key when it expired; cleared when the key is written again.
    tombstones: HashMap<String, u64>,
    next_version: u64,
}

impl Keyspace {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    /// Live entry for `key`, dropping it first if its TTL has elapsed.
    fn live_mut(&mut self, key: &str, now_millis: u64) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at_millis)
            .is_some_and(|at| at <= now_millis);
        if expired {
            self.entries.remove(key);
            let version = self.bump();
            self.tombstones.insert(key.to_string(), version);
        }
        self.entries.get_mut(key)
    }

    /// Version a watch compares against; `None` only for a key that never existed.
    fn version_of(&mut self, key: &str, now_millis: u64) -> Option<u64> {
        match self.live_mut(key, now_millis) {
            Some(entry) => Some(entry.version),
            None => self.tombstones.get(key).copied(),
        }
    }

    fn insert(&mut self, key: &str, entry: Entry) {
        self.tombstones.remove(key);
        self.entries.insert(key.to_string(), entry);
    }
}

#[derive(Debug)]
struct Shared {
    keyspace: Mutex<Keyspace>,
    clock: Arc<dyn Clock>,
    password: Option<String>,
    reachable: AtomicBool,
    dials: AtomicUsize,
}

impl Shared {
    fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }
    }
}

/// Shared in-memory keyspace; also the [`Dialer`] for its own connections.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Store whose TTLs follow `clock`.
    pub fn new<C: Clock + 'static>(clock: C) -> Self {
        Self::build(Arc::new(clock), None)
    }

    /// Store that rejects dials not presenting `password`.
    pub fn with_password<C: Clock + 'static>(clock: C, password: impl Into<String>) -> Self {
        Self::build(Arc::new(clock), Some(password.into()))
    }

    fn build(clock: Arc<dyn Clock>, password: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                keyspace: Mutex::new(Keyspace::default()),
                clock,
                password,
                reachable: AtomicBool::new(true),
                dials: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a connection without going through a pool.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection { shared: self.shared.clone(), watched: Vec::new() }
    }

    /// Simulate an outage: while unreachable, dials and every round trip fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Successful dials so far.
    pub fn dial_count(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    /// Current live record for `key`.
    pub fn hash(&self, key: &str) -> Option<Hash> {
        let now = self.shared.clock.now_millis();
        self.shared.keyspace().live_mut(key, now).map(|e| e.hash.clone())
    }

    /// Remaining TTL of `key`; `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.shared.clock.now_millis();
        let mut keyspace = self.shared.keyspace();
        let at = keyspace.live_mut(key, now)?.expires_at_millis?;
        Some(Duration::from_millis(at.saturating_sub(now)))
    }

    /// Overwrite `key` unconditionally, bypassing watches. Counts as a modification.
    pub fn put_raw(&self, key: &str, hash: Hash, ttl: Option<Duration>) {
        let now = self.shared.clock.now_millis();
        let mut keyspace = self.shared.keyspace();
        let version = keyspace.bump();
        let expires_at_millis = ttl.map(|t| now.saturating_add(duration_millis(t)));
        keyspace.insert(key, Entry { hash, version, expires_at_millis });
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Dialer for MemoryStore {
    type Connection = MemoryConnection;

    async fn dial(&self, endpoint: &Endpoint) -> Result<MemoryConnection, StoreError> {
        tokio::task::yield_now().await;
        self.shared.check_reachable()?;
        if let Some(expected) = &self.shared.password {
            if endpoint.password.as_deref() != Some(expected.as_str()) {
                return Err(StoreError::Auth("invalid password".to_string()));
            }
        }
        self.shared.dials.fetch_add(1, Ordering::SeqCst);
        Ok(self.connect())
    }
}

/// One connection to a [`MemoryStore`]. Watches are per connection.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    watched: Vec<(String, Option<u64>)>,
}

impl MemoryConnection {
    async fn round_trip(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.shared.check_reachable()
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn ping(&mut self) -> Result<(), StoreError> {
        self.round_trip().await
    }

    async fn watch(&mut self, key: &str) -> Result<(), StoreError> {
        self.round_trip().await?;
        let now = self.shared.clock.now_millis();
        let version = self.shared.keyspace().version_of(key, now);
        self.watched.push((key.to_string(), version));
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<(), StoreError> {
        self.round_trip().await?;
        self.watched.clear();
        Ok(())
    }

    async fn read_hash(&mut self, key: &str) -> Result<Hash, StoreError> {
        self.round_trip().await?;
        let now = self.shared.clock.now_millis();
        Ok(self.shared.keyspace().live_mut(key, now).map(|e| e.hash.clone()).unwrap_or_default())
    }

    async fn commit(&mut self, write: &HashWrite) -> Result<CommitOutcome, StoreError> {
        let watched = std::mem::take(&mut self.watched);
        self.round_trip().await?;
        let now = self.shared.clock.now_millis();
        let mut keyspace = self.shared.keyspace();
        for (key, seen) in &watched {
            if keyspace.version_of(key, now) != *seen {
                return Ok(CommitOutcome::Conflict);
            }
        }
        let version = keyspace.bump();
        // Purge an expired record so the write starts from an empty hash without a stale TTL.
        if keyspace.live_mut(&write.key, now).is_none() {
            let fresh = Entry { hash: Hash::new(), version, expires_at_millis: None };
            keyspace.insert(&write.key, fresh);
        }
        let Some(entry) = keyspace.entries.get_mut(&write.key) else {
            return Err(StoreError::Protocol(format!("record for {} vanished mid-commit", write.key)));
        };
        entry.hash.extend(write.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        entry.version = version;
        if let Some(ttl) = write.expire {
            entry.expires_at_millis = Some(now.saturating_add(duration_millis(ttl)));
        }
        Ok(CommitOutcome::Applied)
    }
}
