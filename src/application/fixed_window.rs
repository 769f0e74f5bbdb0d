//! In-process fixed-window admission.
//!
//! Tracks per-key counters entirely in local process memory. Windows reset
//! lazily on access; a background sweep reclaims records for keys that have
//! gone idle for a full window.

use crate::application::ports::{Clock, Storage};
use crate::application::BuildError;
use crate::domain::window::WindowRecord;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedStorage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// How long `shutdown` waits for an in-flight sweep before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fixed-window rate limiter with all state in process memory.
///
/// Each key owns a [`WindowRecord`]; the whole decision for a key runs as a
/// single atomic read-modify-write under that key's map entry, so counts are
/// never lost to interleaved callers and never exceed the limit.
///
/// The limiter owns a background sweep task, started at construction, that
/// removes records untouched for a full window. Call [`shutdown`] to stop it
/// with a bounded grace period; dropping the limiter aborts it outright.
///
/// [`shutdown`]: FixedWindowLimiter::shutdown
///
/// # Examples
///
/// ```no_run
/// use window_throttle::FixedWindowLimiter;
/// use std::time::Duration;
///
/// # #[tokio::main] async fn main() {
/// let limiter = FixedWindowLimiter::builder()
///     .limit(100)
///     .window(Duration::from_secs(60))
///     .build()
///     .unwrap();
///
/// if limiter.is_allowed("user:42") {
///     // handle the request
/// }
/// # limiter.shutdown().await;
/// # }
/// ```
pub struct FixedWindowLimiter {
    limit: u64,
    window_millis: u64,
    windows: Arc<ShardedStorage<String, WindowRecord>>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("limit", &self.limit)
            .field("window_millis", &self.window_millis)
            .field("tracked_keys", &self.windows.len())
            .finish_non_exhaustive()
    }
}

impl FixedWindowLimiter {
    /// Start building a limiter.
    pub fn builder() -> FixedWindowLimiterBuilder {
        FixedWindowLimiterBuilder {
            limit: None,
            window: None,
            clock: None,
        }
    }

    /// Decide whether one request for `key` is admitted.
    ///
    /// Admission, window reset, and the increment all happen inside one
    /// per-key atomic section; concurrent calls for the same key serialize
    /// on the map entry, calls for different keys do not.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let admitted = self.windows.with_entry_mut(
            key.to_owned(),
            || WindowRecord::open_at(now),
            |record| record.admit(now, self.window_millis, self.limit),
        );
        trace!(key, admitted, "fixed window decision");
        admitted
    }

    /// The configured admission limit per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Number of keys currently holding a window record.
    ///
    /// Includes expired records the sweep has not reached yet.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Stop the background sweep.
    ///
    /// Signals the sweep task and waits up to a five-second grace period for
    /// any in-flight iteration to finish, then aborts it. Safe to call more
    /// than once; decision calls keep working afterwards (windows still reset
    /// lazily, they are just no longer reclaimed).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .sweeper
            .lock()
            .expect("sweeper mutex poisoned")
            .take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => debug!("sweep task stopped"),
                Err(_) => {
                    warn!(grace = ?SHUTDOWN_GRACE, "sweep task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for FixedWindowLimiter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Builder for [`FixedWindowLimiter`].
pub struct FixedWindowLimiterBuilder {
    limit: Option<u64>,
    window: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
}

impl FixedWindowLimiterBuilder {
    /// Maximum admissions per window. Required, must be greater than zero.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window length. Required, must be greater than zero.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and start the limiter.
    ///
    /// Spawns the background sweep, which ticks once per window starting one
    /// full window after construction.
    ///
    /// # Errors
    /// [`BuildError::ZeroLimit`] or [`BuildError::ZeroWindow`] if either
    /// required field is missing or zero.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<FixedWindowLimiter, BuildError> {
        let limit = self.limit.filter(|l| *l > 0).ok_or(BuildError::ZeroLimit)?;
        let window = self
            .window
            .filter(|w| !w.is_zero())
            .ok_or(BuildError::ZeroWindow)?;
        let window_millis = window.as_millis() as u64;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let windows: Arc<ShardedStorage<String, WindowRecord>> = Arc::new(ShardedStorage::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&windows),
            Arc::clone(&clock),
            window,
            window_millis,
            shutdown_rx,
        ));
        debug!(limit, ?window, "fixed window limiter started");

        Ok(FixedWindowLimiter {
            limit,
            window_millis,
            windows,
            clock,
            shutdown_tx,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

/// Periodic reclamation of expired window records.
///
/// Runs once per window length. Removal goes through `Storage::retain`, which
/// evaluates the predicate under the record's own entry lock, so a record in
/// the middle of a decision is never torn out from under it.
async fn sweep_loop(
    windows: Arc<ShardedStorage<String, WindowRecord>>,
    clock: Arc<dyn Clock>,
    window: Duration,
    window_millis: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now_millis();
                let before = windows.len();
                windows.retain(|_, record| !record.is_expired(now, window_millis));
                let removed = before.saturating_sub(windows.len());
                if removed > 0 {
                    trace!(removed, remaining = windows.len(), "swept expired windows");
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}
