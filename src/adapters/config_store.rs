use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{DomainError, InstallerConfig};
use crate::ports::ConfigStore;

/// Name of the configuration file inside the script directory.
pub const CONFIG_FILE: &str = "installer.toml";

/// TOML-based configuration store rooted at the installer's script directory.
pub struct TomlConfigStore {
    script_dir: PathBuf,
    explicit: Option<PathBuf>,
}

impl TomlConfigStore {
    /// Create a store for `script_dir`. An `explicit` path overrides the
    /// default `installer.toml` location and must exist.
    pub fn new(script_dir: impl Into<PathBuf>, explicit: Option<PathBuf>) -> Result<Self, DomainError> {
        let script_dir = script_dir.into();
        if !script_dir.is_dir() {
            return Err(DomainError::Config(format!(
                "Script directory {} does not exist",
                script_dir.display()
            )));
        }
        if let Some(path) = &explicit {
            if !path.is_file() {
                return Err(DomainError::Config(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            }
        }

        debug!(script_dir = ?script_dir, "ConfigStore initialized");
        Ok(Self {
            script_dir,
            explicit,
        })
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<InstallerConfig, DomainError> {
        let config_path = self.config_path();

        if config_path.exists() {
            debug!(path = ?config_path, "Loading configuration");
            let content = fs::read_to_string(&config_path)?;
            let config: InstallerConfig = toml::from_str(&content)?;
            info!(path = ?config_path, "Configuration loaded");
            Ok(config)
        } else {
            info!(path = ?config_path, "Configuration file not found, using defaults");
            Ok(InstallerConfig::new())
        }
    }

    fn config_path(&self) -> PathBuf {
        self.explicit
            .clone()
            .unwrap_or_else(|| self.script_dir.join(CONFIG_FILE))
    }

    fn script_dir(&self) -> &Path {
        &self.script_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::new(dir.path(), None).unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.environment.name, "fasterwhisper");
        assert!(!store.config_path().exists());
        assert!(store.config_path().ends_with(CONFIG_FILE));
    }

    #[test]
    fn test_load_from_script_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[environment]\nname = \"dictate-test\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let store = TomlConfigStore::new(dir.path(), None).unwrap();
        let config = store.load().unwrap();
        assert_eq!(config.environment.name, "dictate-test");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(store.script_dir(), dir.path());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("other.toml");
        let err = TomlConfigStore::new(dir.path(), Some(missing)).err().unwrap();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn test_shipped_config_parses() {
        let config: InstallerConfig = toml::from_str(include_str!("../../installer.toml")).unwrap();
        assert_eq!(config.env_vars.len(), 3);
        assert_eq!(config.artifacts.len(), 2);
        assert!(config.packages.remap.is_empty());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[environment\nname = ").unwrap();

        let store = TomlConfigStore::new(dir.path(), Some(path)).unwrap();
        assert!(store.load().is_err());
    }
}
