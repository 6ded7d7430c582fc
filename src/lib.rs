#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Distributed request admission: a fixed-window counter with a one-second burst sub-window,
//! kept in a shared key-value store so every process enforcing the same policy sees the same
//! counts.
//!
//! ## Features
//!
//! - **Optimistic concurrency**: watch, read, decide, conditional commit; no in-process locks
//! - **Bounded conflict retry** with exponential backoff and jitter
//! - **Connection pooling** with idle eviction, health checks and an active-lease cap
//! - **Cancellation and deadlines** honored at every store round trip
//! - **Injectable clock and sleeper** for deterministic tests
//! - **Pluggable window strategy**; [`FixedWindow`] ships by default
//! - **Tower middleware** and an HTTP response contract
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{
//!     CallContext, ManualClock, MemoryStore, PoolConfig, RateLimitConfig, RateLimiter, Verdict,
//!     WindowUnit,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let clock = ManualClock::at_secs(1_700_000_000);
//!     let store = MemoryStore::new(clock.clone());
//!     let limiter = RateLimiter::bounded(
//!         store,
//!         PoolConfig::builder().build().unwrap(),
//!         RateLimitConfig::new(3, 10, WindowUnit::Second).unwrap(),
//!     )
//!     .with_clock(clock);
//!
//!     let ctx = CallContext::background();
//!     for _ in 0..3 {
//!         assert_eq!(limiter.allow(&ctx, "alice").await, Ok(Verdict::Admitted));
//!     }
//!     assert!(!limiter.allow(&ctx, "alice").await.unwrap().is_admitted());
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod http;
pub mod jitter;
pub mod middleware;
pub mod pool;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod store;
pub mod strategy;
pub mod verdict;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Endpoint, PoolConfig, PoolConfigBuilder, RateLimitConfig, WindowUnit, DEFAULT_STORE_PORT,
};
pub use context::CallContext;
pub use engine::RateLimiter;
pub use error::{AdmissionError, CancelCause, ConfigError, PoolError, StoreError};
pub use http::{check_ratelimit, CheckResponse};
pub use jitter::Jitter;
pub use middleware::{AdmissionLayer, AdmissionService, GateError};
pub use pool::{BoundedPool, ConnectionPool, Dialer, PoolStats, Pooled};
pub use retry::{ConflictRetry, ConflictRetryBuilder, DEFAULT_MAX_ATTEMPTS};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::memory::{MemoryConnection, MemoryStore};
pub use store::{CommitOutcome, Counter, HashRecord, HashWrite, StoreConnection};
pub use strategy::{Decision, FixedWindow, WindowStrategy};
pub use tokio_util::sync::CancellationToken;
pub use verdict::{DenyReason, Verdict};
