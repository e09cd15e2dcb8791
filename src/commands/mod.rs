use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use crate::app::{ControllerOptions, InstallController, RunOptions};
use crate::domain::{ProfileChoice, RecreatePolicy};

/// Accelerator profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileCli {
    /// Probe for an NVIDIA GPU
    Auto,
    Gpu,
    Cpu,
}

impl From<ProfileCli> for ProfileChoice {
    fn from(value: ProfileCli) -> Self {
        match value {
            ProfileCli::Auto => ProfileChoice::Auto,
            ProfileCli::Gpu => ProfileChoice::Gpu,
            ProfileCli::Cpu => ProfileChoice::Cpu,
        }
    }
}

/// Install or verify the Dictate runtime environment.
#[derive(Parser, Debug)]
#[command(
    name = "dictate-setup",
    version,
    about = "Bring this machine to full compliance with the Dictate bill of materials"
)]
pub struct Cli {
    /// Which environment specification to install
    #[arg(long, value_enum, default_value_t = ProfileCli::Auto)]
    pub profile: ProfileCli,

    /// Installer directory holding templates and spec files (defaults to the working directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/installer.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Do not pre-download model assets
    #[arg(long)]
    pub skip_prefetch: bool,

    /// Recreate the environment when its runtime version is wrong
    #[arg(long, conflicts_with = "no_prompt")]
    pub recreate_env: bool,

    /// Never ask; keep an existing environment as it is
    #[arg(long)]
    pub no_prompt: bool,

    /// Validate only and report compliance; change nothing
    #[arg(long)]
    pub check: bool,

    /// Debug-level console output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn recreate_policy(&self) -> RecreatePolicy {
        if self.recreate_env {
            RecreatePolicy::Always
        } else if self.no_prompt {
            RecreatePolicy::Never
        } else {
            RecreatePolicy::Prompt
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            skip_prefetch: self.skip_prefetch,
            recreate: self.recreate_policy(),
            check_only: self.check,
        }
    }
}

/// Run the installer; exit 0 only when the system ends fully compliant.
pub fn execute(cli: Cli) -> ExitCode {
    match install(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("dictate-setup: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn install(cli: Cli) -> anyhow::Result<bool> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let options = ControllerOptions {
        root,
        config: cli.config.clone(),
        profile: cli.profile.into(),
        run: cli.run_options(),
        verbose: cli.verbose,
    };

    let mut controller =
        InstallController::new(options).context("failed to initialize installer")?;

    // Steps run strictly one after another.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let outcome = runtime.block_on(controller.run());

    Ok(outcome.succeeded())
}
