use crate::error::{ServerError, ServerResult};
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lowest port a non-ephemeral listener may use
pub const MIN_PORT: u16 = 1024;

/// Minimum level a log record needs to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub backlog: i32,

    // Connection settings
    /// Register connections edge-triggered instead of level-triggered
    pub edge_triggered: bool,
    /// Idle time before a connection is closed; 0 disables expiry
    pub idle_timeout_ms: u64,
    /// Set `SO_LINGER` (1 s) on accepted sockets
    pub linger_on_close: bool,
    pub max_connections: usize,
    pub max_events: usize,
    pub initial_buffer_size: usize,

    // Content
    pub document_root: PathBuf,

    // Thread configuration
    pub worker_threads: usize,

    // Backing store used by dynamic handlers
    pub store: StoreConfig,

    // Logging
    pub log_level: LogLevel,
    /// Records buffered for the background writer; 0 writes synchronously
    pub log_queue_capacity: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            backlog: 1024,

            edge_triggered: true,
            idle_timeout_ms: 60_000,
            linger_on_close: false,
            max_connections: 65_536,
            max_events: 512,
            initial_buffer_size: 1024,

            document_root: PathBuf::from("resources"),

            worker_threads: num_cpus::get(),

            store: StoreConfig::default(),

            log_level: LogLevel::Info,
            log_queue_capacity: 1024,
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the idle timeout; zero disables it
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the initial buffer size for connections
    pub fn with_initial_buffer_size(mut self, size: usize) -> Self {
        self.initial_buffer_size = size;
        self
    }

    pub fn with_document_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.document_root = root.into();
        self
    }

    pub fn with_edge_triggered(mut self, edge_triggered: bool) -> Self {
        self.edge_triggered = edge_triggered;
        self
    }

    pub fn with_linger_on_close(mut self, linger: bool) -> Self {
        self.linger_on_close = linger;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Idle timeout, `None` when expiry is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> ServerResult<()> {
        if self.port != 0 && self.port < MIN_PORT {
            return Err(ServerError::Config(format!(
                "Port {} is reserved; use 0 or {}..=65535",
                self.port, MIN_PORT
            )));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be at least 1".to_string()));
        }
        if self.max_events == 0 {
            return Err(ServerError::Config("max_events must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.backlog <= 0 {
            return Err(ServerError::Config("backlog must be positive".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
