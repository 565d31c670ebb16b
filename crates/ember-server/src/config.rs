//! Runtime configuration for the server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ConnLimits;
use crate::error::{ServerError, ServerResult};
use crate::worker_pool::WorkerPoolConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum number of open connections. Beyond it, new connections get a
    /// busy reply and are dropped.
    pub max_connections: usize,
    /// Worker threads and pending-item bound.
    pub workers: WorkerPoolConfig,
    /// Interval between timer sweeps.
    pub tick_interval: Duration,
    /// Ticks without activity before a connection is evicted.
    pub idle_ticks: u32,
    /// Ticks a closed connection stays inspectable before release.
    pub grace_ticks: u32,
    /// Per-connection buffer sizes and default document.
    pub limits: ConnLimits,
    /// Directory static files are served from.
    pub doc_root: PathBuf,
}

impl ServerConfig {
    /// Creates a configuration with default settings.
    pub fn new(bind_addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            max_connections: 65_535,
            workers: WorkerPoolConfig::default(),
            tick_interval: Duration::from_secs(5),
            idle_ticks: 3,
            grace_ticks: 2,
            limits: ConnLimits::default(),
            doc_root: PathBuf::from("resources"),
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.workers.threads = threads;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.workers.max_pending = max_pending;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_idle_ticks(mut self, ticks: u32) -> Self {
        self.idle_ticks = ticks;
        self
    }

    pub fn with_grace_ticks(mut self, ticks: u32) -> Self {
        self.grace_ticks = ticks;
        self
    }

    pub fn with_doc_root(mut self, doc_root: impl Into<PathBuf>) -> Self {
        self.doc_root = doc_root.into();
        self
    }

    pub fn with_default_document(mut self, document: impl Into<String>) -> Self {
        self.limits.default_document = document.into();
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.limits.read_buffer_size = size;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.limits.write_buffer_size = size;
        self
    }

    /// Time without activity before a connection is evicted.
    pub fn idle_timeout(&self) -> Duration {
        self.tick_interval * self.idle_ticks
    }

    /// Time a closed connection stays inspectable before release.
    pub fn grace_period(&self) -> Duration {
        self.tick_interval * self.grace_ticks
    }

    /// Rejects settings the server cannot start with.
    pub fn validate(&self) -> ServerResult<()> {
        let checks = [
            (self.max_connections == 0, "max_connections must be positive"),
            (self.workers.threads == 0, "worker threads must be positive"),
            (self.workers.max_pending == 0, "max_pending must be positive"),
            (self.tick_interval.is_zero(), "tick interval must be positive"),
            (self.idle_ticks == 0, "idle_ticks must be positive"),
            (self.grace_ticks == 0, "grace_ticks must be positive"),
            (self.limits.read_buffer_size == 0, "read buffer size must be positive"),
            (self.limits.write_buffer_size == 0, "write buffer size must be positive"),
            (self.limits.default_document.is_empty(), "default document must be set"),
        ];

        for (failed, message) in checks {
            if failed {
                return Err(ServerError::InvalidConfig(message.to_string()));
            }
        }
        Ok(())
    }
}
