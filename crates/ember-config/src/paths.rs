//! Where configuration files live.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// File name of the tracked project config.
pub const PROJECT_FILE: &str = "ember.toml";
/// File name of the untracked per-machine override.
pub const LOCAL_FILE: &str = "ember.local.toml";

/// Config file locations for one project directory.
#[derive(Debug, Clone)]
pub struct Paths {
    project_dir: PathBuf,
    user_dir: Option<PathBuf>,
}

impl Paths {
    /// Locates the user config directory (`$XDG_CONFIG_HOME/ember` on Linux)
    /// alongside `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            user_dir: ProjectDirs::from("dev", "ember", "ember")
                .map(|dirs| dirs.config_dir().to_path_buf()),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.user_dir
            .as_ref()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoUserConfigDir)
    }

    pub fn project_config_file(&self) -> PathBuf {
        self.project_dir.join(PROJECT_FILE)
    }

    pub fn local_config_file(&self) -> PathBuf {
        self.project_dir.join(LOCAL_FILE)
    }

    /// Existing config files, lowest precedence first.
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.user_config_file()
            .into_iter()
            .chain([self.project_config_file(), self.local_config_file()])
            .filter(|path| path.is_file())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn project_files_sit_in_project_dir() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let paths = Paths::new(temp_dir.path());

        assert_eq!(paths.project_config_file(), temp_dir.path().join("ember.toml"));
        assert_eq!(paths.local_config_file(), temp_dir.path().join("ember.local.toml"));
        if let Ok(user) = paths.user_config_file() {
            assert!(user.to_string_lossy().contains("ember"));
        }
    }

    #[test]
    fn existing_files_are_ordered_by_precedence() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let paths = Paths::new(temp_dir.path());
        let local = paths.local_config_file();
        let project = paths.project_config_file();

        std::fs::write(&local, "").unwrap();
        let found: Vec<_> = paths
            .existing_files()
            .into_iter()
            .filter(|path| path.starts_with(temp_dir.path()))
            .collect();
        assert_eq!(found, vec![local.clone()]);

        std::fs::write(&project, "").unwrap();
        let found: Vec<_> = paths
            .existing_files()
            .into_iter()
            .filter(|path| path.starts_with(temp_dir.path()))
            .collect();
        assert_eq!(found, vec![project, local]);
    }
}
