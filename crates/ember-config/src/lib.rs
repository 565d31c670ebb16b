//! Configuration for the ember server.
//!
//! Sources, highest precedence first:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (EMBER_<SECTION>__<KEY>)
//! 3. ember.local.toml (gitignored, local overrides)
//! 4. ember.toml (git-tracked, project config)
//! 5. ~/.config/ember/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main ember configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    pub server: ServerSection,
    pub workers: WorkersSection,
    pub timer: TimerSection,
    pub http: HttpSection,
    pub directory: DirectorySection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: String,
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9006".to_string(),
            max_connections: 65_535,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    pub threads: usize,
    pub max_pending: usize,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            threads: 8,
            max_pending: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSection {
    /// Seconds between eviction sweeps.
    pub tick_secs: u64,
    /// Idle window, in ticks, granted on accept and after every read or write.
    pub idle_ticks: u32,
    /// Ticks a closed connection stays inspectable before it is released.
    pub grace_ticks: u32,
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            idle_ticks: 3,
            grace_ticks: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub doc_root: PathBuf,
    pub default_document: String,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from("resources"),
            default_document: "judge.html".to_string(),
            read_buffer_size: 2048,
            write_buffer_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySection {
    /// TOML file with a `[users]` table seeding the user directory.
    pub users_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    /// Directory for daily-rolling log files. Logs go to stderr when unset.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "ember.log".to_string(),
        }
    }
}

impl EmberConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.http.doc_root.is_relative() {
            self.http.doc_root = base.join(&self.http.doc_root);
        }

        if let Some(users_file) = &self.directory.users_file {
            if users_file.is_relative() {
                self.directory.users_file = Some(base.join(users_file));
            }
        }

        if let Some(log_dir) = &self.log.directory {
            if log_dir.is_relative() {
                self.log.directory = Some(base.join(log_dir));
            }
        }
    }

    /// Rejects values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("server.max_connections", self.server.max_connections == 0),
            ("workers.threads", self.workers.threads == 0),
            ("workers.max_pending", self.workers.max_pending == 0),
            ("http.read_buffer_size", self.http.read_buffer_size == 0),
            ("http.write_buffer_size", self.http.write_buffer_size == 0),
            ("timer.tick_secs", self.timer.tick_secs == 0),
            ("timer.idle_ticks", self.timer.idle_ticks == 0),
            ("timer.grace_ticks", self.timer.grace_ticks == 0),
        ];
        if let Some((key, _)) = zero.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                key,
                reason: "must be positive".to_string(),
            });
        }

        if self.http.default_document.is_empty() || self.http.default_document.contains('/') {
            return Err(ConfigError::InvalidValue {
                key: "http.default_document",
                reason: format!("expected a plain file name, got {:?}", self.http.default_document),
            });
        }

        if self.http.doc_root.exists() && !self.http.doc_root.is_dir() {
            return Err(ConfigError::BadPath {
                key: "http.doc_root",
                path: self.http.doc_root.clone(),
                reason: "is not a directory",
            });
        }

        if let Some(users_file) = &self.directory.users_file {
            if !users_file.is_file() {
                return Err(ConfigError::BadPath {
                    key: "directory.users_file",
                    path: users_file.clone(),
                    reason: "does not exist",
                });
            }
        }

        Ok(())
    }
}
