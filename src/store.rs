//! Shared counter store contract.
//!
//! The store is a network key-value service holding one hash record per rate-limited key. The
//! engine needs only five things from a connection to it:
//! - `watch` a key, establishing an optimistic-lock baseline;
//! - `read_hash` the record (empty = absent);
//! - `commit` a hash write, optionally arming a TTL, that the store applies only if no watched
//!   key changed since the watch (otherwise [`CommitOutcome::Conflict`]);
//! - `unwatch` to drop the baseline when no write follows;
//! - `ping` for health checks.
//!
//! This maps directly onto `WATCH` / `HGETALL` / `MULTI HSET EXPIRE EXEC` / `UNWATCH` / `PING`
//! on a Redis-compatible server. [`memory::MemoryStore`] is an in-process implementation with
//! the same semantics.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

pub mod memory;

/// Field/value pairs of one stored record.
pub type Hash = BTreeMap<String, String>;

/// A record that can be stored as a flat hash.
pub trait HashRecord: Sized {
    fn to_hash(&self) -> Hash;

    /// Decode from a non-empty hash read at `key`.
    fn from_hash(key: &str, hash: &Hash) -> Result<Self, StoreError>;
}

/// Per-key admission state of the fixed window with burst sub-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Admissions granted in the current window.
    pub count: u64,
    /// Admissions granted in the current one-second burst sub-window.
    pub burst_count: u64,
    /// Epoch second at which the burst sub-window was last reset.
    pub last_updated: u64,
}

impl Counter {
    pub const COUNT: &'static str = "count";
    pub const BURST_COUNT: &'static str = "burst_count";
    pub const LAST_UPDATED: &'static str = "last_updated";

    /// State after the first admission of a window.
    pub fn opened_at(now_secs: u64) -> Self {
        Self { count: 1, burst_count: 1, last_updated: now_secs }
    }
}

fn decode_field(key: &str, hash: &Hash, field: &'static str) -> Result<u64, StoreError> {
    let raw = hash.get(field).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        field,
        reason: "is missing".to_string(),
    })?;
    raw.trim().parse::<u64>().map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        field,
        reason: format!("is not a non-negative integer ({:?}: {})", raw, e),
    })
}

impl HashRecord for Counter {
    fn to_hash(&self) -> Hash {
        let mut hash = Hash::new();
        hash.insert(Self::COUNT.to_string(), self.count.to_string());
        hash.insert(Self::BURST_COUNT.to_string(), self.burst_count.to_string());
        hash.insert(Self::LAST_UPDATED.to_string(), self.last_updated.to_string());
        hash
    }

    fn from_hash(key: &str, hash: &Hash) -> Result<Self, StoreError> {
        Ok(Self {
            count: decode_field(key, hash, Self::COUNT)?,
            burst_count: decode_field(key, hash, Self::BURST_COUNT)?,
            last_updated: decode_field(key, hash, Self::LAST_UPDATED)?,
        })
    }
}

/// A conditional hash write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashWrite {
    pub key: String,
    /// Fields to set; fields not named are left as they are.
    pub fields: Hash,
    /// Arm the key's TTL. `None` leaves any existing TTL untouched.
    pub expire: Option<Duration>,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// A watched key changed since it was watched; nothing was written.
    Conflict,
}

/// One exclusive connection to the store.
#[async_trait]
pub trait StoreConnection: Send {
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Start watching `key` for modifications.
    async fn watch(&mut self, key: &str) -> Result<(), StoreError>;

    /// Drop all watches on this connection.
    async fn unwatch(&mut self) -> Result<(), StoreError>;

    /// Read every field of `key`; an absent or expired key reads as empty.
    async fn read_hash(&mut self, key: &str) -> Result<Hash, StoreError>;

    /// Apply `write` atomically unless a watched key changed. Clears all watches either way.
    async fn commit(&mut self, write: &HashWrite) -> Result<CommitOutcome, StoreError>;

    /// Flag the connection as unusable so a pool closes it instead of reusing it.
    fn mark_broken(&mut self) {}
}
