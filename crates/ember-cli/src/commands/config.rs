//! Configuration display command.

use std::path::Path;

use anyhow::{Context, Result};
use ember_config::EmberConfig;

/// Prints the merged configuration for `project_dir`.
pub fn show(project_dir: &Path) -> Result<()> {
    let config = EmberConfig::load_from_dir(project_dir).context("Failed to load configuration")?;
    println!("{}", render(&config)?);
    Ok(())
}

fn render(config: &EmberConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_project_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ember.toml"),
            "[workers]\nthreads = 3\n\n[http]\ndefault_document = \"index.html\"\n",
        )
        .unwrap();

        let config = EmberConfig::load_from_dir(dir.path()).unwrap();
        let rendered = render(&config).unwrap();

        assert!(rendered.contains("threads = 3"));
        assert!(rendered.contains("default_document = \"index.html\""));
        let reparsed: toml::Value = toml::from_str(&rendered).unwrap();
        assert!(reparsed.get("timer").is_some());
    }
}
