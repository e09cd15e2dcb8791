use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::app::context::InstallContext;
use crate::domain::{
    BomEntry, BomKind, ComplianceReport, DomainError, ValidationResult, SYSTEM_PACKAGE_PRESENT,
};
use crate::ports::{EnvironmentManager, InstalledVersions, PackageRef, SystemPackageManager};

/// Live system state needed to judge a set of BOM entries.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    pub env_exists: bool,
    pub versions: InstalledVersions,
    /// Variables in the environment manager's persistent store.
    pub persisted: BTreeMap<String, String>,
    /// Variables exposed by the current activation.
    pub active: BTreeMap<String, String>,
    /// Installed version per system package; `None` when absent.
    pub system: BTreeMap<String, Option<String>>,
}

/// Keep as many dot components of `live` as `declared` has, so a declared
/// `3.11` is compared against `3.11` of a live `3.11.9`.
fn project_version(live: &str, declared: &str) -> String {
    let parts = declared.split('.').count();
    live.split('.').take(parts).collect::<Vec<_>>().join(".")
}

/// Judge one entry against live state. Every kind ends in the same
/// whole-string comparison.
pub fn check(entry: &BomEntry, live: &LiveState) -> ValidationResult {
    let actual = match &entry.kind {
        BomKind::RuntimeVersion => live
            .versions
            .runtime
            .as_deref()
            .map(|v| project_version(v, &entry.expected)),
        BomKind::LanguagePackage { .. } => live.versions.packages.get(&entry.name).cloned(),
        BomKind::SystemPackage => match live.system.get(&entry.name) {
            Some(Some(_)) if entry.expected == SYSTEM_PACKAGE_PRESENT => {
                Some(SYSTEM_PACKAGE_PRESENT.to_string())
            }
            Some(Some(version)) => Some(version.clone()),
            _ => None,
        },
        BomKind::EnvVar => {
            // Only a variable both persisted and picked up by an activation
            // counts; persisting alone leaves it inactive.
            match (live.persisted.get(&entry.name), live.active.get(&entry.name)) {
                (Some(persisted), Some(active)) if persisted == active => Some(active.clone()),
                (Some(persisted), Some(active)) => {
                    Some(format!("{} (persisted {})", active, persisted))
                }
                _ => None,
            }
        }
        BomKind::Directory => Path::new(&entry.expected)
            .is_dir()
            .then(|| entry.expected.clone()),
        BomKind::GeneratedFile => Path::new(&entry.expected)
            .is_file()
            .then(|| entry.expected.clone()),
    };

    ValidationResult::evaluate(&entry.name, entry.kind.clone(), &entry.expected, actual)
}

/// Compares live state against the BOM.
///
/// The same queries and the same comparison run before and after
/// installation.
pub struct Validator {
    env: Arc<dyn EnvironmentManager>,
    system: Arc<dyn SystemPackageManager>,
}

impl Validator {
    pub fn new(env: Arc<dyn EnvironmentManager>, system: Arc<dyn SystemPackageManager>) -> Self {
        Self { env, system }
    }

    /// Query only what `entries` need.
    async fn gather(
        &self,
        ctx: &mut InstallContext,
        entries: &[BomEntry],
    ) -> Result<LiveState, DomainError> {
        let env_name = ctx.paths.env_name.clone();
        let mut live = LiveState::default();

        let needs_env = entries.iter().any(|e| {
            matches!(
                e.kind,
                BomKind::RuntimeVersion | BomKind::LanguagePackage { .. } | BomKind::EnvVar
            )
        });
        if needs_env {
            live.env_exists = self.env.exists(&env_name).await?;
        }

        if live.env_exists {
            let packages: Vec<PackageRef> = entries
                .iter()
                .filter_map(|e| match &e.kind {
                    BomKind::LanguagePackage {
                        distribution,
                        channel,
                    } => Some(PackageRef {
                        import_name: e.name.clone(),
                        distribution: distribution.clone(),
                        channel: channel.clone(),
                    }),
                    _ => None,
                })
                .collect();
            let needs_versions = !packages.is_empty()
                || entries.iter().any(|e| matches!(e.kind, BomKind::RuntimeVersion));
            if needs_versions {
                live.versions = self.env.installed_versions(&env_name, &packages).await?;
            }

            if entries.iter().any(|e| matches!(e.kind, BomKind::EnvVar)) {
                live.persisted = self.env.persisted_vars(&env_name).await?;
                if ctx.activation.is_none() {
                    debug!(env = %env_name, "Activating environment for variable checks");
                    ctx.activation = Some(self.env.reactivate(&env_name).await?);
                }
                live.active = ctx.activation.clone().unwrap_or_default();
            }
        }

        for entry in entries.iter().filter(|e| matches!(e.kind, BomKind::SystemPackage)) {
            let version = self.system.installed_version(&entry.name).await?;
            live.system.insert(entry.name.clone(), version);
        }

        Ok(live)
    }

    /// Validate the whole BOM and log the table.
    pub async fn validate(&self, ctx: &mut InstallContext) -> Result<ComplianceReport, DomainError> {
        let entries = ctx.bom.entries().to_vec();
        let live = self.gather(ctx, &entries).await?;
        let report = ComplianceReport::new(entries.iter().map(|e| check(e, &live)).collect());
        log_report(&report);
        Ok(report)
    }

    /// Re-check a single component.
    pub async fn validate_entry(
        &self,
        ctx: &mut InstallContext,
        name: &str,
    ) -> Result<ValidationResult, DomainError> {
        let entry = ctx
            .bom
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::Config(format!("'{}' is not a BOM component", name)))?;
        let live = self.gather(ctx, std::slice::from_ref(&entry)).await?;
        let result = check(&entry, &live);
        info!(
            component = %result.name,
            expected = %result.expected,
            actual = result.actual.as_deref().unwrap_or("-"),
            status = %result.status,
            "Re-checked"
        );
        Ok(result)
    }
}

/// Write the validation table, one line per component, then the summary.
pub fn log_report(report: &ComplianceReport) {
    info!("{:<28} {:<40} {:<40} {}", "COMPONENT", "EXPECTED", "ACTUAL", "");
    for [name, expected, actual, symbol] in report.table_rows() {
        info!("{:<28} {:<40} {:<40} {}", name, expected, actual, symbol);
    }
    info!("{}", report.summary());
}
