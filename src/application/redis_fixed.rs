//! Redis-backed fixed-window admission.
//!
//! Counters live in the backing store, so every process sharing the store
//! sees the same counts. Window boundaries are aligned to fixed intervals
//! since the Unix epoch and the counter key self-expires; no local state is
//! kept at all.

use crate::application::ports::Clock;
use crate::application::BuildError;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::redis::{RedisStore, StoreError};
use std::sync::Arc;
use tracing::trace;

/// Fixed-window rate limiter backed by the shared store.
///
/// For each decision the limiter derives the key `rate:<identifier>:<window>`
/// from the current window index and atomically increments it. The first
/// increment of a window also sets the key's TTL to the window size, so
/// counters clean themselves up.
///
/// # Examples
///
/// ```no_run
/// use window_throttle::{RedisFixedWindowLimiter, RedisStore, ServerMode};
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
/// let limiter = RedisFixedWindowLimiter::builder()
///     .limit(100)
///     .window_secs(60)
///     .store(store)
///     .build()?;
///
/// if limiter.is_allowed("api-key:abc").await? {
///     // handle the request
/// }
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct RedisFixedWindowLimiter {
    store: Arc<RedisStore>,
    clock: Arc<dyn Clock>,
    limit: u64,
    window_secs: u64,
}

impl RedisFixedWindowLimiter {
    /// Start building a limiter.
    pub fn builder() -> RedisFixedWindowLimiterBuilder {
        RedisFixedWindowLimiterBuilder {
            limit: None,
            window_secs: None,
            store: None,
            clock: None,
        }
    }

    /// Decide whether one request for `key` is admitted.
    ///
    /// The increment itself is atomic in the store, so concurrent callers
    /// across processes get distinct counts. Setting the TTL is a second
    /// store call issued only by whichever caller created the key; between
    /// the two calls the key briefly exists without a TTL, which can leave a
    /// counter alive past its window under pathological timing but never
    /// changes an admit/deny outcome.
    ///
    /// # Errors
    /// [`StoreError`] if a store command fails; a denial is the `Ok(false)`
    /// return, never an error.
    pub async fn is_allowed(&self, key: &str) -> Result<bool, StoreError> {
        let window_index = self.clock.now_millis() / 1000 / self.window_secs;
        let counter_key = format!("rate:{}:{}", key, window_index);

        let count = self.store.incr(&counter_key).await?;
        if count == 1 {
            self.store
                .expire(&counter_key, self.window_secs as i64)
                .await?;
        }

        let admitted = count <= self.limit;
        trace!(key, count, admitted, "remote fixed window decision");
        Ok(admitted)
    }

    /// The configured admission limit per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The configured window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
}

/// Builder for [`RedisFixedWindowLimiter`].
pub struct RedisFixedWindowLimiterBuilder {
    limit: Option<u64>,
    window_secs: Option<u64>,
    store: Option<Arc<RedisStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RedisFixedWindowLimiterBuilder {
    /// Maximum admissions per window. Required, must be greater than zero.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window length in seconds. Required, must be greater than zero.
    pub fn window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = Some(window_secs);
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
    /// [`BuildError::ZeroLimit`], [`BuildError::ZeroWindow`], or
    /// [`BuildError::MissingStore`] if a required field is missing or zero.
    pub fn build(self) -> Result<RedisFixedWindowLimiter, BuildError> {
        let limit = self.limit.filter(|l| *l > 0).ok_or(BuildError::ZeroLimit)?;
        let window_secs = self
            .window_secs
            .filter(|w| *w > 0)
            .ok_or(BuildError::ZeroWindow)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(RedisFixedWindowLimiter {
            store,
            clock,
            limit,
            window_secs,
        })
    }
}
