use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::adapters::UserFiles;
use crate::app::context::InstallContext;
use crate::app::validator::Validator;
use crate::domain::template::render;
use crate::domain::{
    ArtifactConfig, ArtifactRole, BomKind, ComplianceReport, DomainError, InstallState,
    RecreatePolicy, StepOutcome, TemplateVars, SYSTEM_PACKAGE_PRESENT,
};
use crate::ports::{
    CommandExecutor, EnvironmentManager, Invocation, PackageRef, SystemPackageManager,
};

/// How a run ended.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: InstallState,
    /// Number of mutating actions performed.
    pub mutations: usize,
    pub error: Option<DomainError>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == InstallState::Done
    }
}

/// Drives the installation states in order, one at a time.
pub struct Pipeline {
    validator: Validator,
    env: Arc<dyn EnvironmentManager>,
    system: Arc<dyn SystemPackageManager>,
    executor: Arc<dyn CommandExecutor>,
    files: UserFiles,
}

impl Pipeline {
    pub fn new(
        env: Arc<dyn EnvironmentManager>,
        system: Arc<dyn SystemPackageManager>,
        executor: Arc<dyn CommandExecutor>,
        files: UserFiles,
    ) -> Self {
        Self {
            validator: Validator::new(env.clone(), system.clone()),
            env,
            system,
            executor,
            files,
        }
    }

    /// Run from VALIDATE_PRE until DONE or FAILED.
    pub async fn run(&self, ctx: &mut InstallContext) -> PipelineOutcome {
        let mut state = InstallState::ValidatePre;
        let mut mutations = 0;

        while !state.is_terminal() {
            info!("==================== {} ====================", state);
            let before = (ctx.report.correct, ctx.report.total);

            let outcome = match self.step(state, ctx).await {
                Ok(StepOutcome::Completed { actions }) if actions > 0 => {
                    mutations += actions;
                    if state.is_mutating() && state != InstallState::AssetPrefetch {
                        self.revalidate(ctx).await.map(|_| StepOutcome::Completed { actions })
                    } else {
                        Ok(StepOutcome::Completed { actions })
                    }
                }
                other => other,
            };

            match outcome {
                Ok(StepOutcome::Finished) => {
                    info!(state = %state, "System already compliant; nothing to do");
                    state = InstallState::Done;
                }
                Ok(StepOutcome::Completed { actions }) => {
                    info!(
                        state = %state,
                        actions,
                        before = %format!("{}/{}", before.0, before.1),
                        after = %format!("{}/{}", ctx.report.correct, ctx.report.total),
                        "Step completed"
                    );
                    state = state.next();
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    info!(
                        state = %state,
                        reason = %reason,
                        before = %format!("{}/{}", before.0, before.1),
                        after = %format!("{}/{}", ctx.report.correct, ctx.report.total),
                        "Step skipped"
                    );
                    state = state.next();
                }
                Err(e) => {
                    log_failure(state, &e);
                    return PipelineOutcome {
                        state: InstallState::Failed,
                        mutations,
                        error: Some(e),
                    };
                }
            }
        }

        PipelineOutcome {
            state,
            mutations,
            error: None,
        }
    }

    async fn revalidate(&self, ctx: &mut InstallContext) -> Result<(), DomainError> {
        ctx.report = self.validator.validate(ctx).await?;
        Ok(())
    }

    async fn step(
        &self,
        state: InstallState,
        ctx: &mut InstallContext,
    ) -> Result<StepOutcome, DomainError> {
        match state {
            InstallState::ValidatePre => self.validate_pre(ctx).await,
            InstallState::SystemPackages => self.system_packages(ctx).await,
            InstallState::RuntimeEnvironment => self.runtime_environment(ctx).await,
            InstallState::EnvVars => self.env_vars(ctx).await,
            InstallState::Directories => self.directories(ctx),
            InstallState::GeneratedFiles => self.generated_files(ctx),
            InstallState::PackageReconciliation => self.reconcile_packages(ctx).await,
            InstallState::DesktopIntegration => self.desktop_integration(ctx).await,
            InstallState::AssetPrefetch => self.prefetch(ctx).await,
            InstallState::ValidatePost => self.validate_post(ctx).await,
            InstallState::Done | InstallState::Failed => Ok(StepOutcome::Finished),
        }
    }

    async fn validate_pre(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        self.revalidate(ctx).await?;
        if ctx.report.is_compliant() {
            return Ok(StepOutcome::Finished);
        }
        if ctx.options.check_only {
            return Err(compliance_error(&ctx.report));
        }
        Ok(StepOutcome::Completed { actions: 0 })
    }

    async fn system_packages(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        let missing: Vec<(String, Option<String>)> = ctx
            .report
            .failing(|k| matches!(k, BomKind::SystemPackage))
            .map(|r| {
                let pin = (r.expected != SYSTEM_PACKAGE_PRESENT).then(|| r.expected.clone());
                (r.name.clone(), pin)
            })
            .collect();
        if missing.is_empty() {
            return Ok(StepOutcome::Skipped("all system packages present".to_string()));
        }

        let (critical, optional): (Vec<_>, Vec<_>) = missing
            .into_iter()
            .partition(|(name, _)| is_critical(ctx, name));
        let mut actions = 0;
        if !critical.is_empty() {
            self.system.install(&critical).await?;
            actions += critical.len();
        }
        if !optional.is_empty() {
            let names: Vec<&str> = optional.iter().map(|(name, _)| name.as_str()).collect();
            let result = self.system.install(&optional).await;
            if tolerate(&names.join(", "), false, result)?.is_some() {
                actions += optional.len();
            }
        }
        Ok(StepOutcome::Completed { actions })
    }

    async fn runtime_environment(
        &self,
        ctx: &mut InstallContext,
    ) -> Result<StepOutcome, DomainError> {
        let env = ctx.paths.env_name.clone();

        if !self.env.exists(&env).await? {
            self.create_environment(ctx).await?;
            return Ok(StepOutcome::Completed { actions: 1 });
        }

        let runtime_failing = ctx
            .bom
            .runtime()
            .and_then(|entry| ctx.report.get(&entry.name))
            .map(|r| !r.is_ok())
            .unwrap_or(false);
        if !runtime_failing {
            return Ok(StepOutcome::Skipped(format!(
                "environment '{}' exists; packages are reconciled later",
                env
            )));
        }

        if self.confirm_recreate(ctx).await? {
            self.env.remove(&env).await?;
            ctx.activation = None;
            self.create_environment(ctx).await?;
            Ok(StepOutcome::Completed { actions: 2 })
        } else {
            warn!(env = %env, "Keeping environment with non-compliant runtime");
            Ok(StepOutcome::Skipped("recreation declined".to_string()))
        }
    }

    async fn create_environment(&self, ctx: &mut InstallContext) -> Result<(), DomainError> {
        let spec_file = ctx.paths.spec_file.clone();
        if !spec_file.is_file() {
            return Err(DomainError::MissingDependency {
                what: format!("environment specification {}", spec_file.display()),
                hint: "restore the file or select another profile".to_string(),
            });
        }
        self.env.create(&ctx.paths.env_name, &spec_file).await?;
        ctx.activation = None;
        Ok(())
    }

    async fn confirm_recreate(&self, ctx: &InstallContext) -> Result<bool, DomainError> {
        let runtime = ctx.bom.runtime().map(|e| e.expected.clone()).unwrap_or_default();
        match ctx.options.recreate {
            RecreatePolicy::Always => {
                info!(env = %ctx.paths.env_name, "Recreating environment (requested)");
                Ok(true)
            }
            RecreatePolicy::Never => Ok(false),
            RecreatePolicy::Prompt if !std::io::stdin().is_terminal() => {
                info!("Not an interactive terminal; keeping existing environment");
                Ok(false)
            }
            RecreatePolicy::Prompt => {
                info!(
                    "Environment '{}' does not provide runtime {}. Recreate it? [y/N]",
                    ctx.paths.env_name, runtime
                );
                let mut answer = String::new();
                BufReader::new(tokio::io::stdin())
                    .read_line(&mut answer)
                    .await?;
                let yes = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
                info!(answer = %answer.trim(), recreate = yes, "Operator answered");
                Ok(yes)
            }
        }
    }

    async fn env_vars(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        let wanted: BTreeMap<String, String> = ctx
            .report
            .failing(|k| matches!(k, BomKind::EnvVar))
            .map(|r| (r.name.clone(), r.expected.clone()))
            .collect();
        if wanted.is_empty() {
            return Ok(StepOutcome::Skipped("all variables active".to_string()));
        }

        let env = ctx.paths.env_name.clone();
        let (critical, optional): (BTreeMap<_, _>, BTreeMap<_, _>) = wanted
            .into_iter()
            .partition(|(name, _)| is_critical(ctx, name));
        let mut persisted = Vec::new();
        if !critical.is_empty() {
            self.env.persist_vars(&env, &critical).await?;
            persisted.extend(critical.keys().cloned());
        }
        if !optional.is_empty() {
            let names: Vec<&str> = optional.keys().map(String::as_str).collect();
            let result = self.env.persist_vars(&env, &optional).await;
            if tolerate(&names.join(", "), false, result)?.is_some() {
                persisted.extend(optional.keys().cloned());
            }
        }
        if persisted.is_empty() {
            return Ok(StepOutcome::Completed { actions: 0 });
        }

        // Persisted values only take effect in a fresh activation.
        let activation = self.env.reactivate(&env).await;
        ctx.activation = tolerate("environment activation", !critical.is_empty(), activation)?;
        info!(env = %env, vars = ?persisted, "Environment reactivated");

        Ok(StepOutcome::Completed {
            actions: persisted.len(),
        })
    }

    fn directories(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        let missing: Vec<(String, PathBuf)> = ctx
            .report
            .failing(|k| matches!(k, BomKind::Directory))
            .map(|r| (r.name.clone(), PathBuf::from(&r.expected)))
            .collect();
        if missing.is_empty() {
            return Ok(StepOutcome::Skipped("all directories exist".to_string()));
        }

        let mut actions = 0;
        for (name, dir) in &missing {
            let result = self.files.ensure_dir(dir);
            if tolerate(name, is_critical(ctx, name), result)?.is_some() {
                actions += 1;
            }
        }
        Ok(StepOutcome::Completed { actions })
    }

    /// Render every failing artifact with `role`. Failures of non-critical
    /// artifacts are reported and left for VALIDATE_POST.
    fn render_artifacts(
        &self,
        ctx: &InstallContext,
        role: ArtifactRole,
    ) -> Result<usize, DomainError> {
        let vars = ctx.paths.template_vars();
        let mut rendered = 0;

        for artifact in ctx.config.artifacts.iter().filter(|a| a.role == role) {
            let failing = ctx
                .report
                .get(&artifact.name)
                .map(|r| !r.is_ok())
                .unwrap_or(true);
            if !failing {
                continue;
            }
            let result = self.render_artifact(ctx, artifact, &vars);
            if tolerate(&artifact.name, artifact.critical, result)?.is_some() {
                rendered += 1;
            }
        }
        Ok(rendered)
    }

    fn render_artifact(
        &self,
        ctx: &InstallContext,
        artifact: &ArtifactConfig,
        vars: &TemplateVars,
    ) -> Result<(), DomainError> {
        let mode = artifact.mode_bits().ok_or_else(|| {
            DomainError::Config(format!(
                "artifact '{}' has invalid mode '{}'",
                artifact.name, artifact.mode
            ))
        })?;
        let template = ctx.paths.script_dir.join(&artifact.template);
        let output = ctx.paths.render_path(&artifact.output)?;
        self.files.render_to_file(&template, &output, vars, mode)
    }

    fn generated_files(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        match self.render_artifacts(ctx, ArtifactRole::Launcher)? {
            0 => Ok(StepOutcome::Skipped("generated files present".to_string())),
            actions => Ok(StepOutcome::Completed { actions }),
        }
    }

    async fn reconcile_packages(
        &self,
        ctx: &mut InstallContext,
    ) -> Result<StepOutcome, DomainError> {
        let failing: Vec<(PackageRef, String)> = ctx
            .report
            .failing(|k| matches!(k, BomKind::LanguagePackage { .. }))
            .filter_map(|r| match &r.kind {
                BomKind::LanguagePackage {
                    distribution,
                    channel,
                } => Some((
                    PackageRef {
                        import_name: r.name.clone(),
                        distribution: distribution.clone(),
                        channel: channel.clone(),
                    },
                    r.expected.clone(),
                )),
                _ => None,
            })
            .collect();
        if failing.is_empty() {
            return Ok(StepOutcome::Skipped("all packages at expected versions".to_string()));
        }

        let env = ctx.paths.env_name.clone();
        for (package, version) in &failing {
            info!(package = %package.import_name, version = %version, "Repairing package");
            // One attempt only; an install failure ends the run.
            self.env.install_pinned(&env, package, version).await?;

            let result = self.validator.validate_entry(ctx, &package.import_name).await?;
            if !result.is_ok() {
                return Err(DomainError::ValidationMismatch {
                    component: result.name,
                    expected: result.expected,
                    actual: result.actual,
                });
            }
            ctx.report.replace(result);
        }

        Ok(StepOutcome::Completed {
            actions: failing.len(),
        })
    }

    async fn desktop_integration(
        &self,
        ctx: &mut InstallContext,
    ) -> Result<StepOutcome, DomainError> {
        let rendered = self.render_artifacts(ctx, ArtifactRole::Desktop)?;
        if rendered == 0 {
            return Ok(StepOutcome::Skipped("desktop entry present".to_string()));
        }

        if let Err(e) = self.register_desktop(ctx).await {
            warn!(error = %e, "Desktop registration failed; the entry is still usable");
        }
        Ok(StepOutcome::Completed { actions: rendered })
    }

    async fn register_desktop(&self, ctx: &InstallContext) -> Result<(), DomainError> {
        let vars = ctx.paths.template_vars();
        let argv = ctx
            .config
            .desktop
            .register
            .iter()
            .map(|part| render(part, &vars))
            .collect::<Result<Vec<_>, _>>()?;
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };
        let inv = Invocation::user(program.as_str()).args(args.iter().cloned());
        self.executor
            .run(&inv)
            .await?
            .check(InstallState::DesktopIntegration.name(), &inv)?;
        Ok(())
    }

    async fn prefetch(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        if ctx.options.skip_prefetch {
            return Ok(StepOutcome::Skipped("--skip-prefetch".to_string()));
        }
        if ctx.config.prefetch.is_empty() {
            return Ok(StepOutcome::Skipped("no assets configured".to_string()));
        }

        let env = ctx.paths.env_name.clone();
        let mut actions = 0;
        for asset in &ctx.config.prefetch {
            info!(asset = %asset.name, "Pre-fetching asset");
            let result = self.env.run_in(&env, &asset.command).await;
            if tolerate(&asset.name, asset.critical, result)?.is_some() {
                actions += 1;
            }
        }
        Ok(StepOutcome::Completed { actions })
    }

    async fn validate_post(&self, ctx: &mut InstallContext) -> Result<StepOutcome, DomainError> {
        self.revalidate(ctx).await?;
        if !ctx.report.is_compliant() {
            return Err(compliance_error(&ctx.report));
        }
        Ok(StepOutcome::Completed { actions: 0 })
    }
}

fn is_critical(ctx: &InstallContext, name: &str) -> bool {
    ctx.bom.get(name).map(|e| e.critical).unwrap_or(true)
}

/// Pass a critical failure through. A non-critical one is logged and left
/// for VALIDATE_POST to report.
fn tolerate<T>(
    component: &str,
    critical: bool,
    result: Result<T, DomainError>,
) -> Result<Option<T>, DomainError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if critical => Err(e),
        Err(e) => {
            warn!(component, kind = e.kind(), error = %e, "Non-critical component failed; continuing");
            Ok(None)
        }
    }
}

/// Log every non-compliant component and return the first as the error.
fn compliance_error(report: &ComplianceReport) -> DomainError {
    for r in report.failing(|_| true) {
        error!(
            component = %r.name,
            kind = %r.kind,
            expected = %r.expected,
            actual = r.actual.as_deref().unwrap_or("-"),
            status = %r.status,
            "Not compliant"
        );
    }
    match report.failing(|_| true).next() {
        Some(r) => DomainError::ValidationMismatch {
            component: r.name.clone(),
            expected: r.expected.clone(),
            actual: r.actual.clone(),
        },
        None => DomainError::Config("compliance check failed without a failing component".to_string()),
    }
}

fn log_failure(state: InstallState, e: &DomainError) {
    error!(state = %state, kind = e.kind(), error = %e, "Step failed");
    if let DomainError::InstallFailure { output, .. } = e {
        for line in output.lines() {
            error!(state = %state, "  {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::RunOptions;
    use crate::app::testing::{fixture, FakeEnvironment, FakeSystem, Fixture, ScriptedExecutor};
    use crate::domain::InstallerConfig;
    use crate::infrastructure::file_layer;
    use tracing_subscriber::layer::SubscriberExt;

    const SYSTEM: &[&str] = &["libportaudio2", "xclip", "xdotool"];

    struct Harness {
        fx: Fixture,
        env: Arc<FakeEnvironment>,
        system: Arc<FakeSystem>,
        exec: Arc<ScriptedExecutor>,
    }

    impl Harness {
        fn new(env: FakeEnvironment, system: FakeSystem) -> Self {
            Self {
                fx: fixture(),
                env: Arc::new(env),
                system: Arc::new(system),
                exec: Arc::new(ScriptedExecutor::default()),
            }
        }

        fn pipeline(&self) -> Pipeline {
            Pipeline::new(
                self.env.clone(),
                self.system.clone(),
                self.exec.clone(),
                UserFiles::new(self.fx.identity()),
            )
        }

        async fn run(&self) -> PipelineOutcome {
            self.run_with(self.fx.context()).await
        }

        async fn run_with(&self, mut ctx: InstallContext) -> PipelineOutcome {
            self.pipeline().run(&mut ctx).await
        }

        fn install_attempts(&self) -> usize {
            self.env
                .mutations()
                .iter()
                .filter(|m| m.starts_with("install "))
                .count()
        }
    }

    #[tokio::test]
    async fn test_fresh_install_then_idempotent_rerun() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());

        let first = h.run().await;
        assert_eq!(first.state, InstallState::Done, "{:?}", first.error);
        assert!(first.mutations > 0);
        assert_eq!(h.system.installs(), vec!["libportaudio2", "xclip", "xdotool"]);
        assert!(h.fx.launcher().is_file());
        assert!(h.fx.desktop_entry().is_file());
        assert!(h.fx.transcripts().is_dir());
        let launcher = std::fs::read_to_string(h.fx.launcher()).unwrap();
        assert!(!launcher.contains("${"));
        assert!(launcher.contains("conda run -n fasterwhisper"));

        let env_mutations = h.env.mutations();
        let exec_calls = h.exec.calls().len();

        let second = h.run().await;
        assert_eq!(second.state, InstallState::Done);
        assert_eq!(second.mutations, 0);
        assert_eq!(h.env.mutations(), env_mutations);
        assert_eq!(h.exec.calls().len(), exec_calls);
        assert_eq!(h.system.installs().len(), 3);
    }

    #[tokio::test]
    async fn test_env_vars_persisted_and_reactivated() {
        let h = Harness::new(FakeEnvironment::provisioned(), FakeSystem::with_installed(SYSTEM));
        let mut ctx = h.fx.context();

        let outcome = h.pipeline().run(&mut ctx).await;

        assert!(outcome.succeeded());
        let state = h.env.state();
        assert_eq!(state.persisted.get("KMP_DUPLICATE_LIB_OK").map(String::as_str), Some("TRUE"));
        let active = ctx.activation.unwrap();
        assert_eq!(active.get("TTKBOOTSTRAP_FONT_MANAGER").map(String::as_str), Some("tk"));
        assert!(ctx.report.get("KMP_DUPLICATE_LIB_OK").unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_check_mode_never_mutates() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        let ctx = h.fx.context_with(RunOptions {
            check_only: true,
            ..Default::default()
        });

        let outcome = h.run_with(ctx).await;

        assert_eq!(outcome.state, InstallState::Failed);
        assert_eq!(outcome.mutations, 0);
        assert!(matches!(outcome.error, Some(DomainError::ValidationMismatch { .. })));
        assert!(h.env.mutations().is_empty());
        assert!(h.system.installs().is_empty());
        assert!(!h.fx.launcher().exists());
    }

    #[tokio::test]
    async fn test_missing_package_repaired_once() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        assert!(h.run().await.succeeded());

        h.env.update(|s| {
            s.packages.remove("numpy");
        });
        let outcome = h.run().await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert_eq!(h.install_attempts(), 1);
        assert!(h.env.mutations().contains(&"install numpy=1.26.4".to_string()));
    }

    #[tokio::test]
    async fn test_failed_repair_is_fatal_without_retry() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        h.env.update(|s| {
            s.create_packages.remove("torch");
            s.failing.insert("torch".to_string());
        });

        let outcome = h.run().await;

        assert_eq!(outcome.state, InstallState::Failed);
        assert!(matches!(outcome.error, Some(DomainError::InstallFailure { .. })));
        assert_eq!(h.install_attempts(), 1);
        assert!(!h.env.mutations().iter().any(|m| m.starts_with("run ")));
    }

    #[tokio::test]
    async fn test_ineffective_repair_is_a_mismatch() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        h.env.update(|s| {
            s.create_packages.insert("numpy".to_string(), "2.0.0".to_string());
            s.ineffective.insert("numpy".to_string());
        });

        let outcome = h.run().await;

        assert_eq!(outcome.state, InstallState::Failed);
        match outcome.error {
            Some(DomainError::ValidationMismatch {
                component, actual, ..
            }) => {
                assert_eq!(component, "numpy");
                assert_eq!(actual.as_deref(), Some("2.0.0"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.install_attempts(), 1);
    }

    #[tokio::test]
    async fn test_system_package_failure_stops_before_environment() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::failing());

        let outcome = h.run().await;

        assert_eq!(outcome.state, InstallState::Failed);
        assert!(matches!(outcome.error, Some(DomainError::InstallFailure { .. })));
        assert!(h.env.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_mismatch_recreated_when_requested() {
        let h = Harness::new(FakeEnvironment::provisioned(), FakeSystem::with_installed(SYSTEM));
        h.env.update(|s| s.runtime = Some("3.10.14".to_string()));
        let ctx = h.fx.context_with(RunOptions {
            recreate: RecreatePolicy::Always,
            ..Default::default()
        });

        let outcome = h.run_with(ctx).await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        let mutations = h.env.mutations();
        assert_eq!(mutations[0], "remove fasterwhisper");
        assert_eq!(mutations[1], "create fasterwhisper");
    }

    #[tokio::test]
    async fn test_runtime_mismatch_kept_fails_post_validation() {
        let h = Harness::new(FakeEnvironment::provisioned(), FakeSystem::with_installed(SYSTEM));
        h.env.update(|s| s.runtime = Some("3.10.14".to_string()));

        let outcome = h.run().await;

        assert_eq!(outcome.state, InstallState::Failed);
        match outcome.error {
            Some(DomainError::ValidationMismatch { component, .. }) => {
                assert_eq!(component, "python")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!h.env.mutations().iter().any(|m| m.starts_with("remove")));
    }

    #[tokio::test]
    async fn test_prefetch_skipped_and_optional_failure() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        let ctx = h.fx.context_with(RunOptions {
            skip_prefetch: true,
            ..Default::default()
        });
        assert!(h.run_with(ctx).await.succeeded());
        assert!(!h.env.mutations().iter().any(|m| m.starts_with("run ")));

        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        h.env.update(|s| s.prefetch_fails = true);
        let outcome = h.run().await;
        assert!(outcome.succeeded(), "{:?}", outcome.error);
        assert!(h.env.mutations().iter().any(|m| m.starts_with("run ")));
    }

    #[tokio::test]
    async fn test_desktop_registration_is_best_effort() {
        let h = Harness {
            exec: Arc::new(ScriptedExecutor::new(vec![crate::ports::CommandOutput {
                code: Some(127),
                stdout: String::new(),
                stderr: "update-desktop-database: not found".to_string(),
            }])),
            ..Harness::new(FakeEnvironment::default(), FakeSystem::default())
        };

        let outcome = h.run().await;

        assert!(outcome.succeeded(), "{:?}", outcome.error);
        let calls = h.exec.calls();
        assert_eq!(calls[0].program, "update-desktop-database");
        assert!(calls[0].args[0].ends_with(".local/share/applications"));
    }

    #[tokio::test]
    async fn test_optional_system_package_failure_continues() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::without(&["xdotool"]));
        let mut config = InstallerConfig::default();
        config.system_packages[2].critical = false;

        let outcome = h
            .run_with(h.fx.context_from(config, RunOptions::default()))
            .await;

        assert_eq!(outcome.state, InstallState::Failed);
        match outcome.error {
            Some(DomainError::ValidationMismatch { component, .. }) => {
                assert_eq!(component, "xdotool")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.system.installs(), vec!["libportaudio2", "xclip"]);
        assert!(h.env.mutations().contains(&"create fasterwhisper".to_string()));
        assert!(h.fx.launcher().is_file());
    }

    #[tokio::test]
    async fn test_critical_system_package_failure_is_fatal() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::without(&["xdotool"]));

        let outcome = h.run().await;

        assert_eq!(outcome.state, InstallState::Failed);
        assert!(matches!(outcome.error, Some(DomainError::InstallFailure { .. })));
        assert!(h.system.installs().is_empty());
        assert!(h.env.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_follows_criticality() {
        let h = Harness::new(FakeEnvironment::default(), FakeSystem::default());
        std::fs::write(h.fx.home.join("Music"), "not a directory").unwrap();

        let outcome = h.run().await;
        assert_eq!(outcome.state, InstallState::Failed);
        assert!(matches!(outcome.error, Some(DomainError::Io(_))));
        assert!(!h.fx.launcher().exists());

        let mut config = InstallerConfig::default();
        for dir in &mut config.directories {
            dir.critical = false;
        }
        let outcome = h
            .run_with(h.fx.context_from(config, RunOptions::default()))
            .await;
        assert_eq!(outcome.state, InstallState::Failed);
        match outcome.error {
            Some(DomainError::ValidationMismatch { component, .. }) => {
                assert!(component.ends_with("-dir"), "{component}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.fx.launcher().is_file());
    }

    #[tokio::test]
    async fn test_skipped_step_logs_compliance_counts() {
        let h = Harness::new(FakeEnvironment::provisioned(), FakeSystem::with_installed(SYSTEM));
        let logs = tempfile::tempdir().unwrap();
        let (layer, handle) = file_layer(logs.path(), &chrono::Local::now()).unwrap();
        let log_file = handle.path().to_path_buf();
        let scope = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        assert!(h.run().await.succeeded());

        drop(scope);
        drop(handle);
        let text = std::fs::read_to_string(log_file).unwrap();
        let skipped = text
            .lines()
            .find(|line| line.contains("Step skipped") && line.contains("SYSTEM_PACKAGES"))
            .unwrap();
        assert!(skipped.contains("before="), "{skipped}");
        assert!(skipped.contains("after="), "{skipped}");
        assert!(skipped.contains("all system packages present"), "{skipped}");
    }
}
