//! User directory consulted by the login and registration routes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Credential store behind `/2` (login) and `/3` (registration).
pub trait UserDirectory: Send + Sync {
    /// Returns true if `name` exists and its password is `password`.
    fn authenticate(&self, name: &str, password: &str) -> bool;

    /// Adds `name`. Returns false if the name is already taken.
    fn register(&self, name: &str, password: &str) -> bool;
}

/// Process-local directory. Registrations live until the process exits.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: HashMap<String, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a directory seeded from a TOML file with a `[users]` table of
    /// `name = "password"` entries.
    pub fn from_toml_file(path: &Path) -> ServerResult<Self> {
        let directory_error = |reason: String| ServerError::Directory {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| directory_error(e.to_string()))?;
        let file: UsersFile = toml::from_str(&content).map_err(|e| directory_error(e.to_string()))?;

        info!(path = %path.display(), users = file.users.len(), "loaded user directory");
        Ok(Self {
            users: RwLock::new(file.users),
        })
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserDirectory for InMemoryDirectory {
    fn authenticate(&self, name: &str, password: &str) -> bool {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(name).is_some_and(|stored| stored == password)
    }

    fn register(&self, name: &str, password: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(name) {
            return false;
        }
        users.insert(name.to_string(), password.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_authenticate() {
        let directory = InMemoryDirectory::new();
        assert!(!directory.authenticate("a", "b"));
        assert!(directory.register("a", "b"));
        assert!(!directory.register("a", "other"), "names are unique");
        assert!(directory.authenticate("a", "b"));
        assert!(!directory.authenticate("a", "other"));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn seeds_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        std::fs::write(&path, "[users]\nalice = \"secret\"\nbob = \"hunter2\"\n").unwrap();

        let directory = InMemoryDirectory::from_toml_file(&path).unwrap();
        assert_eq!(directory.len(), 2);
        assert!(directory.authenticate("alice", "secret"));
        assert!(!directory.register("bob", "x"));
    }

    #[test]
    fn bad_seed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        std::fs::write(&path, "[users\n").unwrap();

        let err = InMemoryDirectory::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, ServerError::Directory { .. }));

        let missing = InMemoryDirectory::from_toml_file(&dir.path().join("nope.toml"));
        assert!(missing.is_err());
    }
}
