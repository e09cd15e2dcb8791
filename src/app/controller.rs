use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info};

use crate::adapters::{
    resolve_invoking_identity, AcceleratorDetector, CondaEnvironment, DpkgPackages,
    TomlConfigStore, ToolManager, UserFiles, UserShellExecutor,
};
use crate::app::context::{assemble_bom, InstallContext, ResolvedPaths, RunOptions};
use crate::app::pipeline::{Pipeline, PipelineOutcome};
use crate::domain::{AcceleratorProfile, DomainError, Identity, InstallerConfig, ProfileChoice};
use crate::infrastructure::init_logging;
use crate::ports::{CommandExecutor, ConfigStore, HardwareDetector};

const SUPPORTED_MANAGER: &str = "conda";

/// What the operator asked for on the command line.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Installer directory holding templates, spec files and `installer.toml`.
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub profile: ProfileChoice,
    pub run: RunOptions,
    pub verbose: bool,
}

/// Wires configuration, logging, adapters and the pipeline for one run.
pub struct InstallController {
    ctx: InstallContext,
    pipeline: Pipeline,
}

impl InstallController {
    /// Initialize the installer.
    /// This loads configuration, opens the install log and assembles the BOM.
    pub fn new(options: ControllerOptions) -> Result<Self, DomainError> {
        let started = Local::now();

        // Step 1: Initialize config store
        let store = TomlConfigStore::new(&options.root, options.config.clone())?;

        // Step 2: Load configuration
        let config = store.load()?;

        // Step 3: Resolve who we are installing for
        let identity = resolve_invoking_identity()?;
        let files = UserFiles::new(identity.clone());

        // Step 4: Initialize logging
        let logs_dir = store.script_dir().join(&config.logging.dir);
        files.ensure_dir(&logs_dir)?;
        let log = init_logging(&logs_dir, &config.logging.level, options.verbose, &started)?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            config = ?store.config_path(),
            user = %identity.user,
            elevated = identity.elevated,
            "dictate-setup starting"
        );

        // From here on every failure lands in the install log.
        match Self::assemble(&store, config, identity, files, &options) {
            Ok((ctx, pipeline)) => Ok(Self {
                ctx: ctx.with_log(log),
                pipeline,
            }),
            Err(e) => {
                error!(
                    kind = e.kind(),
                    error = %e,
                    log = %log.path().display(),
                    "Installer could not start; see {} for details",
                    log.path().display()
                );
                Err(e)
            }
        }
    }

    fn assemble(
        store: &TomlConfigStore,
        config: InstallerConfig,
        identity: Identity,
        files: UserFiles,
        options: &ControllerOptions,
    ) -> Result<(InstallContext, Pipeline), DomainError> {
        if config.environment.manager != SUPPORTED_MANAGER {
            return Err(DomainError::Config(format!(
                "unsupported environment manager '{}' (supported: {})",
                config.environment.manager, SUPPORTED_MANAGER
            )));
        }

        // Step 5: Choose the BOM source variant
        let detected = match options.profile {
            ProfileChoice::Auto => AcceleratorDetector::new().detect()?,
            _ => AcceleratorProfile::none(),
        };
        let profile = options.profile.resolve(&detected);
        let script_dir = store.script_dir().to_path_buf();
        let spec_file = script_dir.join(profile.spec_file(&config.profiles));
        let spec_text = fs::read_to_string(&spec_file).map_err(|e| DomainError::MissingDependency {
            what: format!("environment specification {}", spec_file.display()),
            hint: e.to_string(),
        })?;

        // Step 6: Build the BOM
        let paths = ResolvedPaths {
            home: identity.home.clone(),
            script_dir,
            env_name: config.environment.name.clone(),
            spec_file,
        };
        let bom = assemble_bom(&config, &paths, &spec_text)?;
        info!(
            profile = %profile,
            spec = ?paths.spec_file,
            components = bom.len(),
            "BOM assembled"
        );

        // Step 7: Adapters
        let managers = ToolManager::registry(&identity.home, &config.tool_managers);
        let executor: Arc<dyn CommandExecutor> =
            Arc::new(UserShellExecutor::new(identity, managers));
        let env = Arc::new(CondaEnvironment::new(
            executor.clone(),
            config.environment.runtime.clone(),
        ));
        let system = Arc::new(DpkgPackages::new(executor.clone()));
        let pipeline = Pipeline::new(env, system, executor, files);

        let ctx = InstallContext::new(bom, config, paths, options.run);
        Ok((ctx, pipeline))
    }

    /// Run the pipeline and write the final summary.
    pub async fn run(&mut self) -> PipelineOutcome {
        let outcome = self.pipeline.run(&mut self.ctx).await;
        summarize(&self.ctx, &outcome);
        outcome
    }
}

fn summarize(ctx: &InstallContext, outcome: &PipelineOutcome) {
    let report = &ctx.report;
    let log = ctx
        .log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    if outcome.succeeded() {
        info!(
            compliant = %format!("{}/{}", report.correct, report.total),
            mutations = outcome.mutations,
            log = %log,
            "Installation complete"
        );
    } else {
        error!(
            compliant = %format!("{}/{}", report.correct, report.total),
            error = outcome.error.as_ref().map(|e| e.kind()).unwrap_or("unknown"),
            "Installation failed; see {} for details",
            log
        );
    }
}
