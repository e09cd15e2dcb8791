use std::fmt;

use async_trait::async_trait;

use crate::domain::DomainError;

/// Which identity a command runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAs {
    /// The invoking (non-root) user, with every known tool-manager
    /// initializer sourced first.
    InvokingUser,
    /// Root, for OS package operations.
    Superuser,
    /// This process as it is, with no initializers. For read-only queries
    /// of system state.
    Process,
}

/// How much of a command's output is interesting to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Stream each line at info level.
    Stream,
    /// Record each line at debug level (queries whose output is parsed).
    Quiet,
}

/// A structured command: argv, identity and the tool manager it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: RunAs,
    /// Tool manager whose initializer must be found, if any.
    pub requires: Option<String>,
    pub echo: Echo,
}

impl Invocation {
    pub fn user(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as: RunAs::InvokingUser,
            requires: None,
            echo: Echo::Stream,
        }
    }

    pub fn superuser(program: impl Into<String>) -> Self {
        Self {
            run_as: RunAs::Superuser,
            ..Self::user(program)
        }
    }

    pub fn process(program: impl Into<String>) -> Self {
        Self {
            run_as: RunAs::Process,
            ..Self::user(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn requires(mut self, manager: impl Into<String>) -> Self {
        self.requires = Some(manager.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.echo = Echo::Quiet;
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part.replace('\'', "'\\''"))
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "signal".to_string(),
        }
    }

    /// Turn a nonzero exit into an `InstallFailure` for `step`.
    pub fn check(self, step: &str, invocation: &Invocation) -> Result<Self, DomainError> {
        if self.success() {
            return Ok(self);
        }
        let mut output = self.stderr.trim().to_string();
        if output.is_empty() {
            output = self.stdout.trim().to_string();
        }
        Err(DomainError::install_failure(
            step,
            invocation.display(),
            self.status_text(),
            output,
        ))
    }
}

/// Port for running external commands.
///
/// Every line a command prints is written to the install log as it arrives;
/// the captured copy in `CommandOutput` is for parsing only.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion. A nonzero exit is not an error at this level.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DomainError>;
}
