use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::DomainError;
use crate::ports::{CommandExecutor, Invocation, SystemPackageManager};

/// The only dpkg status that counts as installed. Half-configured,
/// config-files and deinstall states are all treated as absent.
const INSTALLED_STATUS: &str = "install ok installed";

/// Debian package database via `dpkg-query` and `apt-get`.
pub struct DpkgPackages {
    executor: Arc<dyn CommandExecutor>,
}

impl DpkgPackages {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Parse `${Status}\t${Version}` output for one package.
    fn parse_status(stdout: &str) -> Option<String> {
        let line = stdout.lines().next()?;
        let (status, version) = line.split_once('\t')?;
        if status.trim() != INSTALLED_STATUS {
            return None;
        }
        let version = version.trim();
        (!version.is_empty()).then(|| version.to_string())
    }
}

#[async_trait]
impl SystemPackageManager for DpkgPackages {
    async fn installed_version(&self, name: &str) -> Result<Option<String>, DomainError> {
        let inv = Invocation::process("dpkg-query")
            .args(["-W", "-f=${Status}\t${Version}\n", name])
            .quiet();
        let output = self.executor.run(&inv).await?;
        // dpkg-query exits nonzero for unknown packages.
        if !output.success() {
            debug!(package = name, "Package unknown to dpkg");
            return Ok(None);
        }
        Ok(Self::parse_status(&output.stdout))
    }

    async fn install(&self, packages: &[(String, Option<String>)]) -> Result<(), DomainError> {
        if packages.is_empty() {
            return Ok(());
        }

        let update = Invocation::superuser("apt-get").arg("update");
        self.executor
            .run(&update)
            .await?
            .check("SYSTEM_PACKAGES", &update)?;

        let targets: Vec<String> = packages
            .iter()
            .map(|(name, version)| match version {
                Some(v) => format!("{}={}", name, v),
                None => name.clone(),
            })
            .collect();
        info!(packages = ?targets, "Installing system packages");

        let install = Invocation::superuser("apt-get")
            .args(["install", "-y"])
            .args(targets);
        self.executor
            .run(&install)
            .await?
            .check("SYSTEM_PACKAGES", &install)?;
        Ok(())
    }
}
