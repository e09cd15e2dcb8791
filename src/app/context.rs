use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::spec_file::{parse_spec, ImportRemap};
use crate::domain::template::render;
use crate::domain::{
    Bom, BomBuilder, BomEntry, BomKind, ComplianceReport, DomainError, InstallerConfig, Placeholder,
    RecreatePolicy, TemplateVars, SYSTEM_PACKAGE_PRESENT,
};
use crate::infrastructure::LogHandle;

/// Paths and names resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Home directory of the invoking user (not root's under sudo).
    pub home: PathBuf,
    pub script_dir: PathBuf,
    pub env_name: String,
    /// Environment specification file for the selected profile.
    pub spec_file: PathBuf,
}

impl ResolvedPaths {
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars::new()
            .with(Placeholder::UserHome, self.home.display().to_string())
            .with(Placeholder::ScriptDir, self.script_dir.display().to_string())
            .with(Placeholder::EnvName, self.env_name.clone())
    }

    /// Render a configured path and make it absolute against the script
    /// directory.
    pub fn render_path(&self, template: &str) -> Result<PathBuf, DomainError> {
        let rendered = PathBuf::from(render(template, &self.template_vars())?);
        Ok(if rendered.is_absolute() {
            rendered
        } else {
            self.script_dir.join(rendered)
        })
    }
}

/// Operator switches for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_prefetch: bool,
    pub recreate: RecreatePolicy,
    /// Validate only; never mutate.
    pub check_only: bool,
}

/// Everything a run needs, passed explicitly through every step.
pub struct InstallContext {
    pub bom: Bom,
    /// Latest compliance report; empty until VALIDATE_PRE runs.
    pub report: ComplianceReport,
    pub config: InstallerConfig,
    pub paths: ResolvedPaths,
    pub options: RunOptions,
    /// Variables exposed by the most recent activation of the environment
    /// in this run. `None` until the environment has been activated.
    pub activation: Option<BTreeMap<String, String>>,
    log: Option<LogHandle>,
}

impl InstallContext {
    pub fn new(
        bom: Bom,
        config: InstallerConfig,
        paths: ResolvedPaths,
        options: RunOptions,
    ) -> Self {
        Self {
            bom,
            report: ComplianceReport::default(),
            config,
            paths,
            options,
            activation: None,
            log: None,
        }
    }

    pub fn with_log(mut self, log: LogHandle) -> Self {
        self.log = Some(log);
        self
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(LogHandle::path)
    }
}

/// Build the BOM from configuration and the text of the spec file.
///
/// Declared entries come first in configuration order, followed by the
/// entries parsed from the spec file. A key may appear only once across
/// both sources.
pub fn assemble_bom(
    config: &InstallerConfig,
    paths: &ResolvedPaths,
    spec_text: &str,
) -> Result<Bom, DomainError> {
    let mut builder = BomBuilder::new();

    for pkg in &config.system_packages {
        let expected = pkg
            .version
            .clone()
            .unwrap_or_else(|| SYSTEM_PACKAGE_PRESENT.to_string());
        builder.insert_unique(BomEntry::declared(
            &pkg.name,
            BomKind::SystemPackage,
            expected,
            pkg.critical,
            &pkg.note,
        ))?;
    }

    for var in &config.env_vars {
        builder.insert_unique(BomEntry::declared(
            &var.name,
            BomKind::EnvVar,
            &var.value,
            var.critical,
            &var.note,
        ))?;
    }

    for dir in &config.directories {
        let path = paths.render_path(&dir.path)?;
        builder.insert_unique(BomEntry::declared(
            &dir.name,
            BomKind::Directory,
            path.display().to_string(),
            dir.critical,
            &dir.note,
        ))?;
    }

    for artifact in &config.artifacts {
        let path = paths.render_path(&artifact.output)?;
        builder.insert_unique(BomEntry::declared(
            &artifact.name,
            BomKind::GeneratedFile,
            path.display().to_string(),
            artifact.critical,
            format!("rendered from {}", artifact.template),
        ))?;
    }

    let remap = ImportRemap::with_overrides(&config.packages.remap);
    let parsed = parse_spec(spec_text, &config.environment.runtime, &remap)?;
    builder.merge_unique(parsed)?;

    Ok(builder.build())
}
