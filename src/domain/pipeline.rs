use std::fmt;

/// States of the installation pipeline, in execution order.
///
/// State transitions:
/// - ValidatePre -> Done (already fully compliant)
/// - ValidatePre -> SystemPackages -> ... -> AssetPrefetch -> ValidatePost
/// - ValidatePost -> Done (100% compliant) | Failed
/// - any state -> Failed (fatal step error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallState {
    ValidatePre,
    SystemPackages,
    RuntimeEnvironment,
    EnvVars,
    Directories,
    GeneratedFiles,
    PackageReconciliation,
    DesktopIntegration,
    AssetPrefetch,
    ValidatePost,
    Done,
    Failed,
}

impl InstallState {
    /// The state that follows a successful step.
    pub fn next(&self) -> InstallState {
        match self {
            InstallState::ValidatePre => InstallState::SystemPackages,
            InstallState::SystemPackages => InstallState::RuntimeEnvironment,
            InstallState::RuntimeEnvironment => InstallState::EnvVars,
            InstallState::EnvVars => InstallState::Directories,
            InstallState::Directories => InstallState::GeneratedFiles,
            InstallState::GeneratedFiles => InstallState::PackageReconciliation,
            InstallState::PackageReconciliation => InstallState::DesktopIntegration,
            InstallState::DesktopIntegration => InstallState::AssetPrefetch,
            InstallState::AssetPrefetch => InstallState::ValidatePost,
            InstallState::ValidatePost => InstallState::Done,
            InstallState::Done => InstallState::Done,
            InstallState::Failed => InstallState::Failed,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Done | InstallState::Failed)
    }

    /// Whether the step for this state may change the system.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            InstallState::ValidatePre
                | InstallState::ValidatePost
                | InstallState::Done
                | InstallState::Failed
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstallState::ValidatePre => "VALIDATE_PRE",
            InstallState::SystemPackages => "SYSTEM_PACKAGES",
            InstallState::RuntimeEnvironment => "RUNTIME_ENVIRONMENT",
            InstallState::EnvVars => "ENV_VARS",
            InstallState::Directories => "DIRECTORIES",
            InstallState::GeneratedFiles => "GENERATED_FILES",
            InstallState::PackageReconciliation => "PACKAGE_RECONCILIATION",
            InstallState::DesktopIntegration => "DESKTOP_INTEGRATION",
            InstallState::AssetPrefetch => "ASSET_PREFETCH",
            InstallState::ValidatePost => "VALIDATE_POST",
            InstallState::Done => "DONE",
            InstallState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a step reports back to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and changed (or confirmed) system state.
    Completed { actions: usize },
    /// Nothing to do.
    Skipped(String),
    /// The run is finished; go straight to DONE.
    Finished,
}

/// What the operator decided for a non-compliant existing environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecreatePolicy {
    /// Ask on an interactive terminal, proceed otherwise.
    #[default]
    Prompt,
    Always,
    Never,
}
