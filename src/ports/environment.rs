use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::domain::DomainError;

/// A language package to query or install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    /// Identity the package is queried under (BOM key).
    pub import_name: String,
    /// Name the package manager installs.
    pub distribution: String,
    /// Channel for channel-qualified packages.
    pub channel: Option<String>,
}

/// Versions read from inside an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledVersions {
    /// Live runtime version, if the runtime could be started.
    pub runtime: Option<String>,
    /// Import name → installed version, for packages that are present.
    pub packages: BTreeMap<String, String>,
}

/// Port for the per-user environment manager.
///
/// Implementations run every command as the invoking user with the manager
/// initialized, so they work the same whether or not the installer itself is
/// elevated.
#[async_trait]
pub trait EnvironmentManager: Send + Sync {
    /// Whether the named environment exists.
    async fn exists(&self, env: &str) -> Result<bool, DomainError>;

    /// Create the environment from a specification file.
    async fn create(&self, env: &str, spec_file: &Path) -> Result<(), DomainError>;

    /// Remove the environment entirely.
    async fn remove(&self, env: &str) -> Result<(), DomainError>;

    /// Read the runtime version and the versions of `packages`.
    async fn installed_versions(
        &self,
        env: &str,
        packages: &[PackageRef],
    ) -> Result<InstalledVersions, DomainError>;

    /// Install exactly `version` of `package`.
    async fn install_pinned(
        &self,
        env: &str,
        package: &PackageRef,
        version: &str,
    ) -> Result<(), DomainError>;

    /// Variables persisted in the manager's store for `env`.
    async fn persisted_vars(&self, env: &str) -> Result<BTreeMap<String, String>, DomainError>;

    /// Persist variables into the manager's store. They are not active in
    /// any session until the environment is activated again.
    async fn persist_vars(
        &self,
        env: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), DomainError>;

    /// Deactivate and activate `env`, returning the variables the fresh
    /// activation exposes.
    async fn reactivate(&self, env: &str) -> Result<BTreeMap<String, String>, DomainError>;

    /// Run a command inside the activated environment.
    async fn run_in(&self, env: &str, command: &[String]) -> Result<(), DomainError>;
}

/// Port for the OS package database.
#[async_trait]
pub trait SystemPackageManager: Send + Sync {
    /// Installed version of `name`, or `None` when not fully installed.
    async fn installed_version(&self, name: &str) -> Result<Option<String>, DomainError>;

    /// Install packages; `version` pins are honoured when given.
    async fn install(&self, packages: &[(String, Option<String>)]) -> Result<(), DomainError>;
}
