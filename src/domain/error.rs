use thiserror::Error;

/// Domain-level errors for the installer.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation mismatch for {component}: expected {expected}, found {}", .actual.as_deref().unwrap_or("nothing"))]
    ValidationMismatch {
        component: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Missing dependency: {what} ({hint})")]
    MissingDependency { what: String, hint: String },

    #[error("Install failure in {step}: `{command}` exited with {status}")]
    InstallFailure {
        step: String,
        command: String,
        status: String,
        output: String,
    },

    #[error("Tool manager '{manager}' could not be initialized (tried: {})", .searched.join(", "))]
    PrivilegeEnvironment {
        manager: String,
        searched: Vec<String>,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl DomainError {
    /// Shorthand for a nonzero subprocess exit during a mutating step.
    pub fn install_failure(
        step: impl Into<String>,
        command: impl Into<String>,
        status: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        DomainError::InstallFailure {
            step: step.into(),
            command: command.into(),
            status: status.into(),
            output: output.into(),
        }
    }

    /// Taxonomy name used in log lines and the final summary.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::ValidationMismatch { .. } => "ValidationMismatch",
            DomainError::MissingDependency { .. } => "MissingDependency",
            DomainError::InstallFailure { .. } => "InstallFailure",
            DomainError::PrivilegeEnvironment { .. } => "PrivilegeEnvironmentError",
            DomainError::Template(_) => "TemplateError",
            DomainError::Config(_) => "ConfigError",
            DomainError::Serialization(_) => "SerializationError",
            DomainError::Io(_) => "IoError",
        }
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
