use std::path::{Path, PathBuf};

use crate::domain::{DomainError, InstallerConfig};

/// Configuration store port for loading installer configuration.
pub trait ConfigStore: Send + Sync {
    /// Load configuration from persistent storage.
    /// Falls back to defaults if none exists.
    fn load(&self) -> Result<InstallerConfig, DomainError>;

    /// Get the path to the configuration file.
    fn config_path(&self) -> PathBuf;

    /// Directory that relative config paths resolve against.
    fn script_dir(&self) -> &Path;
}
