//! Layered configuration loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use crate::{EmberConfig, Paths};

/// Merges defaults, config files and environment variables into an
/// [`EmberConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loads from the current directory with the `EMBER` prefix.
    pub fn new() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "EMBER".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the environment variable prefix. Variables look like
    /// `<PREFIX>_<SECTION>__<KEY>`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Merges every source, resolves relative paths against the project
    /// directory and validates the result.
    pub fn load(self) -> Result<EmberConfig> {
        let defaults =
            Config::try_from(&EmberConfig::default()).context("Failed to encode defaults")?;
        let mut builder = Config::builder().add_source(defaults);

        for file in Paths::new(&self.project_dir).existing_files() {
            debug!(path = %file.display(), "merging config file");
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
        }

        // Keys contain underscores, so sections split on a double underscore.
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: EmberConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.resolve_paths(&self.project_dir);
        config.validate().context("Configuration failed validation")?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
