//! Configuration file handling for klage.
//!
//! Looks for `.config/klage.toml` in the current directory or any parent directory.

use klage_migrate::ReconcileConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = ".config/klage.toml";

/// Contents of `.config/klage.toml`.
///
/// ```toml
/// database_url = "postgres://localhost/klage"
///
/// [reconcile]
/// table_prefix = "wp_"
/// lock = "advisory"
/// lock_timeout_secs = 60
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_url: Option<String>,
    pub reconcile: ReconcileConfig,
}

/// Load configuration from `.config/klage.toml`, searching up the directory tree.
///
/// Returns the default configuration (and no path) when there is no file.
pub fn load() -> Result<(Config, Option<PathBuf>), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Path) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let Some(config_path) = find_config_file(start) else {
        return Ok((Config::default(), None));
    };
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config
        .reconcile
        .validate()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    Ok((config, Some(config_path)))
}

/// Find `.config/klage.toml` by searching up the directory tree.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read .config/klage.toml: {0}")]
    Io(String),

    #[error("Failed to parse .config/klage.toml: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use klage_migrate::LockPolicy;

    fn write_config(dir: &Path, content: &str) {
        std::fs::create_dir_all(dir.join(".config")).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = load_from(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.is_none());
    }

    #[test]
    fn test_found_in_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
            database_url = "postgres://localhost/klage"

            [reconcile]
            table_prefix = "wp_"
            lock = "none"
            lock_timeout_secs = 15
            "#,
        );
        let nested = dir.path().join("plugins/klage");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = load_from(&nested).unwrap();
        assert_eq!(path, Some(dir.path().join(CONFIG_FILE)));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/klage"));
        assert_eq!(config.reconcile.table_prefix, "wp_");
        assert_eq!(config.reconcile.lock, LockPolicy::Disabled);
        assert_eq!(config.reconcile.lock_timeout_secs, 15);
        assert_eq!(config.reconcile.version_key, "klage_schema_version");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "databse_url = \"postgres://localhost\"\n");
        assert!(matches!(load_from(dir.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[reconcile]\ntable_prefix = \"wp-\"\n");
        let err = load_from(dir.path()).unwrap_err();
        assert!(err.to_string().contains("table_prefix"), "{err}");
    }
}
