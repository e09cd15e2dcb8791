use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use nix::unistd::{Gid, Uid, User};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::config::ToolManagerConfig;
use crate::domain::{DomainError, Identity};
use crate::ports::{CommandExecutor, CommandOutput, Echo, Invocation, RunAs};

/// Wrapper run as `bash -c SOURCE_AND_RUN bash REQUIRED INIT... -- ARGV...`.
///
/// The positional parameters are cleared before anything is sourced. Only a
/// failure of `REQUIRED` (empty when the command needs no manager) aborts
/// with [`INIT_FAILED`]; any other initializer that fails is reported on
/// stderr and skipped. The command word may be a shell function defined by
/// an initializer (e.g. `conda`). Nothing is interpolated into this text.
const SOURCE_AND_RUN: &str = r#"__required="$1"; shift
__inits=()
while [ "$#" -gt 0 ] && [ "$1" != "--" ]; do __inits+=("$1"); shift; done
shift
__argv=("$@")
set --
for __init in "${__inits[@]}"; do
  if ! . "$__init"; then
    if [ "$__init" = "$__required" ]; then
      echo "initializer failed: $__init" >&2
      exit 97
    fi
    echo "warning: initializer $__init failed; continuing without it" >&2
  fi
done
"${__argv[@]}""#;

/// Exit status of [`SOURCE_AND_RUN`] when the required initializer fails.
const INIT_FAILED: i32 = 97;
const INIT_FAILED_MARKER: &str = "initializer failed: ";

/// A per-user tool manager and its initializer scripts in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolManager {
    pub name: String,
    pub initializers: Vec<PathBuf>,
}

impl ToolManager {
    fn resolve(name: &str, home: &Path, paths: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            initializers: paths
                .iter()
                .map(|p| {
                    let path = Path::new(p);
                    if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        home.join(path)
                    }
                })
                .collect(),
        }
    }

    /// Built-in managers followed by configured ones, in sourcing order.
    pub fn registry(home: &Path, extra: &[ToolManagerConfig]) -> Vec<ToolManager> {
        let mut managers = vec![
            Self::resolve(
                "conda",
                home,
                &[
                    "miniconda3/etc/profile.d/conda.sh",
                    "anaconda3/etc/profile.d/conda.sh",
                    "miniforge3/etc/profile.d/conda.sh",
                    "mambaforge/etc/profile.d/conda.sh",
                    "/opt/conda/etc/profile.d/conda.sh",
                ],
            ),
            Self::resolve("nvm", home, &[".nvm/nvm.sh"]),
        ];
        for config in extra {
            let paths: Vec<&str> = config.initializers.iter().map(String::as_str).collect();
            managers.push(Self::resolve(&config.name, home, &paths));
        }
        managers
    }

    /// The first initializer that exists, if any.
    fn present(&self) -> Option<&PathBuf> {
        self.initializers.iter().find(|p| p.is_file())
    }
}

/// Executes commands with the invoking user's tool managers initialized.
///
/// User-level commands always run in a shell that first sources one
/// initializer per known manager, whether or not this process is elevated.
/// When elevated through sudo they additionally drop to the invoking user.
pub struct UserShellExecutor {
    identity: Identity,
    managers: Vec<ToolManager>,
}

impl UserShellExecutor {
    pub fn new(identity: Identity, managers: Vec<ToolManager>) -> Self {
        info!(
            user = %identity.user,
            home = ?identity.home,
            elevated = identity.elevated,
            managers = ?managers.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "UserShellExecutor initialized"
        );
        Self { identity, managers }
    }

    /// Initializers to source, one per manager that has any present.
    fn present_initializers(&self) -> Vec<PathBuf> {
        self.managers
            .iter()
            .filter_map(|m| m.present().cloned())
            .collect()
    }

    /// The initializer that must load for `manager`.
    fn check_requirement(&self, manager: &str) -> Result<PathBuf, DomainError> {
        let found = self.managers.iter().find(|m| m.name == manager);
        match found.and_then(ToolManager::present) {
            Some(path) => {
                debug!(manager, initializer = ?path, "Tool manager initializer found");
                Ok(path.clone())
            }
            None => Err(DomainError::PrivilegeEnvironment {
                manager: manager.to_string(),
                searched: found
                    .map(|m| {
                        m.initializers
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
        }
    }

    /// Full argv for an invocation, given the initializers to source and
    /// the one among them that must succeed.
    pub fn command_line(
        &self,
        invocation: &Invocation,
        required: Option<&Path>,
        initializers: &[PathBuf],
    ) -> Vec<String> {
        let mut argv = Vec::new();
        match invocation.run_as {
            RunAs::Process => {}
            RunAs::Superuser => {
                if !self.identity.elevated {
                    argv.push("sudo".to_string());
                }
            }
            RunAs::InvokingUser => {
                if self.identity.needs_privilege_drop() {
                    argv.extend([
                        "sudo".to_string(),
                        "-u".to_string(),
                        self.identity.user.clone(),
                        "-H".to_string(),
                        "--".to_string(),
                    ]);
                }
                argv.extend([
                    "bash".to_string(),
                    "-c".to_string(),
                    SOURCE_AND_RUN.to_string(),
                    "bash".to_string(),
                    required.map(|p| p.display().to_string()).unwrap_or_default(),
                ]);
                argv.extend(initializers.iter().map(|p| p.display().to_string()));
                argv.push("--".to_string());
            }
        }
        argv.push(invocation.program.clone());
        argv.extend(invocation.args.iter().cloned());
        argv
    }
}

fn emit(echo: Echo, stream: &'static str, line: &str) {
    match echo {
        Echo::Stream => info!(stream, "{}", line),
        Echo::Quiet => debug!(stream, "{}", line),
    }
}

#[async_trait]
impl CommandExecutor for UserShellExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DomainError> {
        let required = match (&invocation.requires, invocation.run_as) {
            (Some(manager), RunAs::InvokingUser) => Some(self.check_requirement(manager)?),
            _ => None,
        };
        let initializers = match invocation.run_as {
            RunAs::InvokingUser => self.present_initializers(),
            RunAs::Superuser | RunAs::Process => Vec::new(),
        };
        let argv = self.command_line(invocation, required.as_deref(), &initializers);

        match invocation.echo {
            Echo::Stream => info!(command = %invocation, run_as = ?invocation.run_as, "Running command"),
            Echo::Quiet => debug!(command = %invocation, run_as = ?invocation.run_as, "Running query"),
        }

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DomainError::MissingDependency {
                    what: argv[0].clone(),
                    hint: format!("install `{}` and re-run", argv[0]),
                },
                _ => DomainError::Io(format!("failed to start `{}`: {}", invocation, e)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::Io("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::Io("stderr was not captured".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut output = CommandOutput::default();
        let (mut out_done, mut err_done) = (false, false);

        // Lines are logged in the order they arrive across both streams.
        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line? {
                    Some(line) => {
                        emit(invocation.echo, "stdout", &line);
                        output.stdout.push_str(&line);
                        output.stdout.push('\n');
                    }
                    None => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line? {
                    Some(line) => {
                        emit(invocation.echo, "stderr", &line);
                        output.stderr.push_str(&line);
                        output.stderr.push('\n');
                    }
                    None => err_done = true,
                },
            }
        }

        let status = child.wait().await?;
        output.code = status.code();

        if let Some(path) = &required {
            if output.code == Some(INIT_FAILED) && output.stderr.contains(INIT_FAILED_MARKER) {
                return Err(DomainError::PrivilegeEnvironment {
                    manager: invocation.requires.clone().unwrap_or_default(),
                    searched: vec![path.display().to_string()],
                });
            }
        }

        if output.success() {
            debug!(command = %invocation, "Command finished");
        } else {
            warn!(command = %invocation, status = %output.status_text(), "Command failed");
        }

        Ok(output)
    }
}

fn identity_for(user: User, elevated: bool) -> Identity {
    Identity {
        user: user.name,
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        home: user.dir,
        elevated,
    }
}

/// Resolve the real user this installation is for.
///
/// Under sudo this is the account named by `SUDO_USER`; otherwise the
/// owner of the effective uid. Lookups go through NSS, so directory-service
/// accounts resolve like local ones.
pub fn resolve_invoking_identity() -> Result<Identity, DomainError> {
    let euid = Uid::effective();
    let elevated = euid.is_root();

    if elevated {
        if let Some(sudo_user) = env::var("SUDO_USER").ok().filter(|u| !u.is_empty() && u != "root") {
            let user = User::from_name(&sudo_user)
                .map_err(|e| DomainError::Config(format!("cannot look up invoking user '{}': {}", sudo_user, e)))?
                .ok_or_else(|| DomainError::Config(format!("invoking user '{}' does not exist", sudo_user)))?;
            info!(user = %user.name, home = ?user.dir, "Running elevated on behalf of invoking user");
            return Ok(identity_for(user, elevated));
        }
    }

    let current = User::from_uid(euid)
        .map_err(|e| DomainError::Config(format!("cannot look up uid {}: {}", euid, e)))?;
    if let Some(user) = current {
        return Ok(identity_for(user, elevated));
    }

    // uid without an account, as in some containers
    let home = dirs::home_dir()
        .ok_or_else(|| DomainError::Config("Could not determine home directory".to_string()))?;
    Ok(Identity {
        user: env::var("USER").unwrap_or_else(|_| euid.to_string()),
        uid: euid.as_raw(),
        gid: Gid::effective().as_raw(),
        home,
        elevated,
    })
}
