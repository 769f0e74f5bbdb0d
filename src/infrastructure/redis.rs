//! Redis store facade.
//!
//! Provides a uniform capability surface over the two deployment topologies
//! of the backing store (standalone, cluster) so that limiters never branch
//! on topology. The facade exposes exactly the primitives the limiters need:
//! atomic increment, expire, and the sorted-set operations backing the
//! sliding-window event log.
//!
//! ## Connection handling
//!
//! Standalone mode uses `redis::aio::ConnectionManager`, a multiplexed
//! connection shared by all in-flight calls; cluster mode uses the async
//! cluster connection, which routes commands to the owning node. Both are
//! cheaply cloneable handles. Connection establishment failures during
//! `connect()` are fatal: this crate performs no reconnect or backoff of its
//! own, that is the redis client's job.

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default connection-establishment timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default per-command response timeout.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default retry budget handed to the redis client.
const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Deployment topology of the backing store.
///
/// Fixed at facade construction and only used to select which underlying
/// connection type serves subsequent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// A single Redis node.
    Standalone,
    /// A partitioned multi-node Redis deployment.
    Cluster,
}

/// Error returned when the facade configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No server mode was set on the builder
    MissingServerMode,
    /// The endpoint list is empty
    NoNodes,
    /// Standalone mode requires exactly one endpoint
    StandaloneNodeCount(usize),
    /// An endpoint failed to parse as `host:port`
    InvalidEndpoint(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingServerMode => write!(f, "server mode must be set"),
            ConfigError::NoNodes => write!(f, "at least one endpoint is required"),
            ConfigError::StandaloneNodeCount(count) => {
                write!(f, "standalone mode requires exactly 1 node, got {}", count)
            }
            ConfigError::InvalidEndpoint(endpoint) => {
                write!(f, "endpoint is not a valid host:port pair: {}", endpoint)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error returned by facade construction and store operations.
///
/// Denials are not errors: `is_allowed` returning `false` is a normal
/// outcome. A `StoreError` means the decision could not be made at all.
#[derive(Debug)]
pub enum StoreError {
    /// The facade configuration is invalid
    Config(ConfigError),
    /// Connection establishment failed; fatal, never retried here
    Unavailable(RedisError),
    /// A store command failed mid-decision
    Operation(RedisError),
    /// The facade was used after `close()`
    Released,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Config(e) => write!(f, "store configuration error: {}", e),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {}", e),
            StoreError::Operation(e) => write!(f, "store operation failed: {}", e),
            StoreError::Released => write!(f, "store has been closed"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Config(e) => Some(e),
            StoreError::Unavailable(e) | StoreError::Operation(e) => Some(e),
            StoreError::Released => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        StoreError::Config(e)
    }
}

/// The topology-specific connection handle behind the facade.
#[derive(Clone)]
enum Connection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Facade over the backing key-value store.
///
/// Constructed once via [`RedisStore::builder`] and shared (typically in an
/// `Arc`) by every limiter that needs it. All operations dispatch internally
/// on the topology selected at construction.
pub struct RedisStore {
    mode: ServerMode,
    connection: RwLock<Option<Connection>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Start building a facade for the given `host:port` endpoints.
    pub fn builder<I, S>(nodes: I) -> RedisStoreBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RedisStoreBuilder {
            nodes: nodes.into_iter().map(Into::into).collect(),
            server_mode: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// The topology this facade was built for.
    pub fn server_mode(&self) -> ServerMode {
        self.mode
    }

    /// Atomically increment the integer at `key`, returning the new value.
    pub async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        match self.connection().await? {
            Connection::Standalone(mut conn) => {
                conn.incr(key, 1).await.map_err(StoreError::Operation)
            }
            Connection::Cluster(mut conn) => {
                conn.incr(key, 1).await.map_err(StoreError::Operation)
            }
        }
    }

    /// Set `key` to expire `seconds` from now.
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<(), StoreError> {
        match self.connection().await? {
            Connection::Standalone(mut conn) => {
                conn.expire(key, seconds).await.map_err(StoreError::Operation)
            }
            Connection::Cluster(mut conn) => {
                conn.expire(key, seconds).await.map_err(StoreError::Operation)
            }
        }
    }

    /// Add `member` to the sorted set at `key` with the given score.
    pub async fn zadd(&self, key: &str, member: &str, score: u64) -> Result<(), StoreError> {
        match self.connection().await? {
            Connection::Standalone(mut conn) => conn
                .zadd(key, member, score)
                .await
                .map_err(StoreError::Operation),
            Connection::Cluster(mut conn) => conn
                .zadd(key, member, score)
                .await
                .map_err(StoreError::Operation),
        }
    }

    /// Remove all members of the sorted set at `key` scored in `[min, max]`.
    pub async fn zrem_range_by_score(
        &self,
        key: &str,
        min: u64,
        max: u64,
    ) -> Result<(), StoreError> {
        match self.connection().await? {
            Connection::Standalone(mut conn) => conn
                .zrembyscore(key, min, max)
                .await
                .map_err(StoreError::Operation),
            Connection::Cluster(mut conn) => conn
                .zrembyscore(key, min, max)
                .await
                .map_err(StoreError::Operation),
        }
    }

    /// Cardinality of the sorted set at `key`.
    pub async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        match self.connection().await? {
            Connection::Standalone(mut conn) => {
                conn.zcard(key).await.map_err(StoreError::Operation)
            }
            Connection::Cluster(mut conn) => {
                conn.zcard(key).await.map_err(StoreError::Operation)
            }
        }
    }

    /// Release all held connections.
    ///
    /// Safe to call multiple times; later operations fail with
    /// [`StoreError::Released`].
    pub async fn close(&self) {
        let mut guard = self.connection.write().await;
        if guard.take().is_some() {
            debug!(mode = ?self.mode, "redis store closed");
        }
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(StoreError::Released)
    }
}

/// Builder for [`RedisStore`].
///
/// Endpoint and topology validation happens in [`connect`](Self::connect)
/// before any connection is attempted; connection establishment failures are
/// then reported as [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct RedisStoreBuilder {
    nodes: Vec<String>,
    server_mode: Option<ServerMode>,
    connection_timeout: Duration,
    socket_timeout: Duration,
    max_attempts: u32,
}

impl RedisStoreBuilder {
    /// Set the deployment topology. Required.
    pub fn server_mode(mut self, mode: ServerMode) -> Self {
        self.server_mode = Some(mode);
        self
    }

    /// Set the connection-establishment timeout (default 1000 ms).
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-command response timeout (default 1000 ms).
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set the retry budget handed to the redis client (default 1000).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Validate the configuration and establish the connection.
    ///
    /// # Errors
    /// - [`StoreError::Config`] if the topology is unset, the node list is
    ///   empty or the wrong size for the mode, or an endpoint fails to parse.
    /// - [`StoreError::Unavailable`] if the connection cannot be established.
    pub async fn connect(self) -> Result<RedisStore, StoreError> {
        let mode = self.server_mode.ok_or(ConfigError::MissingServerMode)?;
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes.into());
        }
        if mode == ServerMode::Standalone && self.nodes.len() != 1 {
            return Err(ConfigError::StandaloneNodeCount(self.nodes.len()).into());
        }

        let urls = self
            .nodes
            .iter()
            .map(|node| parse_endpoint(node))
            .collect::<Result<Vec<_>, _>>()?;

        let connection = match mode {
            ServerMode::Standalone => {
                let client = Client::open(urls[0].as_str()).map_err(StoreError::Unavailable)?;
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.connection_timeout)
                    .set_response_timeout(self.socket_timeout)
                    .set_number_of_retries(self.max_attempts as usize);
                let manager = ConnectionManager::new_with_config(client, config)
                    .await
                    .map_err(StoreError::Unavailable)?;
                Connection::Standalone(manager)
            }
            ServerMode::Cluster => {
                let client = ClusterClient::builder(urls)
                    .connection_timeout(self.connection_timeout)
                    .response_timeout(self.socket_timeout)
                    .retries(self.max_attempts)
                    .build()
                    .map_err(StoreError::Unavailable)?;
                let connection = client
                    .get_async_connection()
                    .await
                    .map_err(StoreError::Unavailable)?;
                Connection::Cluster(connection)
            }
        };

        debug!(?mode, nodes = self.nodes.len(), "redis store connected");

        Ok(RedisStore {
            mode,
            connection: RwLock::new(Some(connection)),
        })
    }
}

/// Parse a `host:port` endpoint into a redis connection URL.
fn parse_endpoint(node: &str) -> Result<String, ConfigError> {
    let (host, port) = node
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidEndpoint(node.to_string()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(ConfigError::InvalidEndpoint(node.to_string()));
    }
    Ok(format!("redis://{}:{}", host, port))
}
