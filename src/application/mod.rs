//! Application layer - the admission limiters.
//!
//! This layer coordinates the domain logic and manages runtime behavior:
//! - In-memory fixed-window limiter (with its background sweep)
//! - Redis-backed fixed-window limiter
//! - Redis-backed sliding-window limiter
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod fixed_window;
pub mod ports;
pub mod redis_fixed;
pub mod redis_sliding;

/// Error returned when building a limiter fails.
///
/// All limiter builders validate eagerly: a `BuildError` surfaces from
/// `build()` before any background task is spawned or store call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Limit must be greater than zero
    ZeroLimit,
    /// Window size must be greater than zero
    ZeroWindow,
    /// Remote limiters need a connected store
    MissingStore,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::ZeroLimit => write!(f, "limit must be greater than 0"),
            BuildError::ZeroWindow => write!(f, "window size must be greater than 0"),
            BuildError::MissingStore => write!(f, "a connected store is required"),
        }
    }
}

impl std::error::Error for BuildError {}
