//! # window-throttle
//!
//! Keyed request admission with three interchangeable strategies: an
//! in-process fixed window, a shared fixed window backed by Redis, and a
//! shared sliding window backed by Redis.
//!
//! Pick one limiter at startup and call its `is_allowed` with whatever
//! identifies a caller (user id, IP, API key). `false` means "over the
//! limit"; errors are reserved for misconfiguration and store failures.
//!
//! ## Quick Start
//!
//! In-memory, single process:
//!
//! ```no_run
//! use window_throttle::FixedWindowLimiter;
//! use std::time::Duration;
//!
//! # #[tokio::main] async fn main() {
//! let limiter = FixedWindowLimiter::builder()
//!     .limit(100)
//!     .window(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! assert!(limiter.is_allowed("user:42"));
//! limiter.shutdown().await;
//! # }
//! ```
//!
//! Shared across processes via Redis:
//!
//! ```no_run
//! use window_throttle::{RedisSlidingWindowLimiter, RedisStore, ServerMode, TimeUnit};
//! use std::sync::Arc;
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(
//!     RedisStore::builder(["127.0.0.1:6379"])
//!         .server_mode(ServerMode::Standalone)
//!         .connect()
//!         .await?,
//! );
//!
//! let limiter = RedisSlidingWindowLimiter::builder()
//!     .limit(100)
//!     .window_size(1)
//!     .time_unit(TimeUnit::Minutes)
//!     .store(store)
//!     .build()?;
//!
//! if limiter.is_allowed("ip:203.0.113.9").await? {
//!     // handle the request
//! }
//! # Ok(()) }
//! ```
//!
//! ## Choosing a strategy
//!
//! - [`FixedWindowLimiter`] — cheapest; counters in local memory, reset at
//!   fixed boundaries. Counts are per process, and a burst straddling a
//!   window boundary can see up to twice the limit admitted across the two
//!   windows.
//! - [`RedisFixedWindowLimiter`] — same boundary semantics, but counts are
//!   shared by every process using the same store. One `INCR` per decision.
//! - [`RedisSlidingWindowLimiter`] — boundary computed relative to each
//!   request, so there is no boundary burst artifact, at the cost of a
//!   sorted-set log per key.
//!
//! ## Consistency under concurrency
//!
//! The in-memory limiter runs each decision as one atomic per-key
//! read-modify-write; its counts never exceed the limit.
//!
//! The remote limiters lean on the store's single-command atomicity (`INCR`
//! is atomic) but their surrounding sequences are deliberately not
//! transactions. The fixed-window's increment-then-expire leaves a short
//! gap where the key has no TTL, and the sliding-window's
//! trim-then-count-then-add lets K truly concurrent callers for one key
//! over-admit by up to K − 1. Both races are bounded, documented on the
//! respective `is_allowed` methods, and covered by tests; neither is
//! patched over with store-side scripting.

// Domain layer - pure admission logic
pub mod domain;

// Application layer - the limiters
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{unit::TimeUnit, window::WindowRecord};

pub use application::{
    fixed_window::{FixedWindowLimiter, FixedWindowLimiterBuilder},
    ports::{Clock, Storage},
    redis_fixed::{RedisFixedWindowLimiter, RedisFixedWindowLimiterBuilder},
    redis_sliding::{RedisSlidingWindowLimiter, RedisSlidingWindowLimiterBuilder},
    BuildError,
};

pub use infrastructure::{
    clock::SystemClock,
    redis::{ConfigError, RedisStore, RedisStoreBuilder, ServerMode, StoreError},
    storage::ShardedStorage,
};
