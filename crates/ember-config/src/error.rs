//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value the server cannot start with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// The platform has no per-user config directory (no home directory).
    #[error("cannot determine the user config directory")]
    NoUserConfigDir,

    /// A configured path does not point where it must.
    #[error("{key} points at {}, which {reason}", path.display())]
    BadPath {
        key: &'static str,
        path: PathBuf,
        reason: &'static str,
    },
}
