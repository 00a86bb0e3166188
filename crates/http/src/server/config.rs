use std::time::Duration;

use crate::ensure;
use crate::protocol::ConfigError;

/// Default number of pool slots
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default read buffer size: room for an 80 KiB head plus 33 KiB of body
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * (80 + 33);

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on request elements plus headers
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Default number of readiness events taken per poll
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Smallest read buffer that still fits a minimal request head
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Limits of a [`Server`](crate::Server), fixed when it is created.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use micro_evhttp::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .max_connections(16)
///     .idle_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_connections(), 16);
/// assert_eq!(config.max_entries(), 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    max_connections: usize,
    read_buffer_size: usize,
    idle_timeout: Duration,
    max_entries: usize,
    event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_entries: DEFAULT_MAX_ENTRIES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder { config: Self::default() }
    }

    /// Size of the connection pool, also used as the listen backlog.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Per-connection read buffer, bounding head plus buffered body.
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Inactivity period after which a connection is closed.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.max_connections > 0, ConfigError::Zero { name: "max_connections" });
        ensure!(!self.idle_timeout.is_zero(), ConfigError::Zero { name: "idle_timeout" });
        ensure!(self.max_entries > 0, ConfigError::Zero { name: "max_entries" });
        ensure!(self.event_capacity > 0, ConfigError::Zero { name: "event_capacity" });
        ensure!(
            self.read_buffer_size >= MIN_READ_BUFFER_SIZE,
            ConfigError::ReadBufferTooSmall { size: self.read_buffer_size, min: MIN_READ_BUFFER_SIZE }
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.config.read_buffer_size = read_buffer_size;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.config.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, event_capacity: usize) -> Self {
        self.config.event_capacity = event_capacity;
        self
    }

    /// # Errors
    ///
    /// Returns a `ConfigError` if a limit is zero or the read buffer cannot
    /// hold a minimal request head.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
