//! Redis-backed sliding-window admission.
//!
//! Keeps a time-ordered log of admitted-request timestamps per key in a
//! sorted set. The window boundary is computed relative to "now" on every
//! call, so there is no point in time where a burst can span two windows and
//! admit twice the limit, which is the fixed window's boundary artifact.
//! The cost is O(log N) store work per call and log storage proportional to
//! the limit for each active key.

use crate::application::ports::Clock;
use crate::application::BuildError;
use crate::domain::unit::TimeUnit;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::redis::{RedisStore, StoreError};
use std::sync::Arc;
use tracing::trace;

/// Sliding-window rate limiter backed by the shared store.
///
/// The event log for a key lives at `rateLimit:<identifier>`; members are the
/// stringified admission timestamps, scored by their own value. Every call
/// first purges members older than the window, then admits based on the
/// remaining cardinality.
///
/// # Examples
///
/// ```no_run
/// use window_throttle::{RedisSlidingWindowLimiter, RedisStore, ServerMode, TimeUnit};
/// use std::sync::Arc;
///
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(
///     RedisStore::builder(["127.0.0.1:6379"])
///         .server_mode(ServerMode::Standalone)
///         .connect()
///         .await?,
/// );
///
/// let limiter = RedisSlidingWindowLimiter::builder()
///     .limit(100)
///     .window_size(1)
///     .time_unit(TimeUnit::Minutes)
///     .store(store)
///     .build()?;
///
/// if limiter.is_allowed("ip:203.0.113.9").await? {
///     // handle the request
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct RedisSlidingWindowLimiter {
    store: Arc<RedisStore>,
    clock: Arc<dyn Clock>,
    limit: u64,
    window_millis: u64,
}

impl RedisSlidingWindowLimiter {
    /// Start building a limiter.
    pub fn builder() -> RedisSlidingWindowLimiterBuilder {
        RedisSlidingWindowLimiterBuilder {
            limit: None,
            window_size: None,
            time_unit: None,
            store: None,
            clock: None,
        }
    }

    /// Decide whether one request for `key` is admitted.
    ///
    /// The trim, the cardinality read, and the admitting write are three
    /// separate store calls, not one transaction. Two concurrent callers for
    /// the same key can both observe a cardinality below the limit before
    /// either has written, and both writes land: with K truly concurrent
    /// callers the window can briefly hold up to `limit + K - 1` events.
    /// This bounded overshoot is a property of the design, not a defect.
    ///
    /// # Errors
    /// [`StoreError`] if a store command fails; a denial is the `Ok(false)`
    /// return, never an error.
    pub async fn is_allowed(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let window_start = now.saturating_sub(self.window_millis);
        let log_key = format!("rateLimit:{}", key);

        // Expire events that have slid out of the window.
        self.store
            .zrem_range_by_score(&log_key, 0, window_start)
            .await?;

        let count = self.store.zcard(&log_key).await?;
        if count < self.limit {
            self.store.zadd(&log_key, &now.to_string(), now).await?;
            // EXPIRE takes whole seconds; a zero TTL would delete the log
            // outright for sub-second windows.
            let ttl_secs = (self.window_millis / 1000).max(1);
            self.store.expire(&log_key, ttl_secs as i64).await?;
            trace!(key, count = count + 1, "sliding window admitted");
            return Ok(true);
        }

        trace!(key, count, "sliding window denied");
        Ok(false)
    }

    /// The configured admission limit per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The configured window length in milliseconds.
    pub fn window_millis(&self) -> u64 {
        self.window_millis
    }
}

/// Builder for [`RedisSlidingWindowLimiter`].
pub struct RedisSlidingWindowLimiterBuilder {
    limit: Option<u64>,
    window_size: Option<u64>,
    time_unit: Option<TimeUnit>,
    store: Option<Arc<RedisStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RedisSlidingWindowLimiterBuilder {
    /// Maximum admissions per window. Required, must be greater than zero.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window size, expressed in the configured [`TimeUnit`]. Required,
    /// must be greater than zero.
    pub fn window_size(mut self, window_size: u64) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// The unit the window size is expressed in. Required.
    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = Some(time_unit);
        self
    }

    /// The connected store facade. Required.
    pub fn store(mut self, store: Arc<RedisStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the limiter.
    ///
    /// # Errors
    /// [`BuildError::ZeroLimit`] if the limit is missing or zero;
    /// [`BuildError::ZeroWindow`] if the window size or time unit is missing
    /// or the window works out to zero milliseconds;
    /// [`BuildError::MissingStore`] if no store was supplied.
    pub fn build(self) -> Result<RedisSlidingWindowLimiter, BuildError> {
        let limit = self.limit.filter(|l| *l > 0).ok_or(BuildError::ZeroLimit)?;
        let window_size = self
            .window_size
            .filter(|w| *w > 0)
            .ok_or(BuildError::ZeroWindow)?;
        let time_unit = self.time_unit.ok_or(BuildError::ZeroWindow)?;
        let window_millis = window_size
            .checked_mul(time_unit.millis())
            .filter(|w| *w > 0)
            .ok_or(BuildError::ZeroWindow)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(RedisSlidingWindowLimiter {
            store,
            clock,
            limit,
            window_millis,
        })
    }
}
