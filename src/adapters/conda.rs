use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::DomainError;
use crate::ports::{CommandExecutor, EnvironmentManager, InstalledVersions, Invocation, PackageRef};

const MANAGER: &str = "conda";

/// Marker preceding the JSON line printed by the version query.
const QUERY_MARKER: &str = "BOM-QUERY ";

/// Prints the runtime version and the installed version of every requested
/// package. Packages are looked up by import identity, then distribution
/// name, then the module's `__version__`.
const VERSION_QUERY: &str = r#"
import importlib, json, platform, sys
import importlib.metadata as md
out = {"runtime": platform.python_version(), "packages": {}}
for spec in json.loads(sys.argv[1]):
    version = None
    for name in (spec["import"], spec["dist"]):
        try:
            version = md.version(name)
            break
        except Exception:
            pass
    if version is None:
        try:
            version = getattr(importlib.import_module(spec["import"]), "__version__", None)
        except Exception:
            version = None
    if version is not None:
        out["packages"][spec["import"]] = str(version)
print("BOM-QUERY " + json.dumps(out))
"#;

#[derive(Debug, Deserialize)]
struct EnvList {
    envs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    runtime: Option<String>,
    #[serde(default)]
    packages: BTreeMap<String, String>,
}

/// Conda-backed environment manager.
pub struct CondaEnvironment {
    executor: Arc<dyn CommandExecutor>,
    runtime: String,
}

impl CondaEnvironment {
    /// `runtime` is the interpreter started inside the environment.
    pub fn new(executor: Arc<dyn CommandExecutor>, runtime: impl Into<String>) -> Self {
        Self {
            executor,
            runtime: runtime.into(),
        }
    }

    fn conda(&self) -> Invocation {
        Invocation::user(MANAGER).requires(MANAGER)
    }

    /// `conda run` inside `env` with output passed straight through.
    fn conda_run(&self, env: &str) -> Invocation {
        self.conda()
            .args(["run", "-n", env, "--no-capture-output"])
    }

    /// Find the query line in `conda run` output, which may carry noise
    /// from activation scripts.
    fn parse_query_output(stdout: &str) -> Result<InstalledVersions, DomainError> {
        let line = stdout
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix(QUERY_MARKER))
            .ok_or_else(|| DomainError::Serialization("version query printed no result".to_string()))?;
        let parsed: QueryResult = serde_json::from_str(line)?;
        Ok(InstalledVersions {
            runtime: parsed.runtime,
            packages: parsed.packages,
        })
    }

    /// Parse `env` output into a variable map.
    fn parse_environment(stdout: &str) -> BTreeMap<String, String> {
        stdout
            .lines()
            .filter_map(|line| line.split_once('='))
            .filter(|(name, _)| {
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn env_matches(prefix: &str, env: &str) -> bool {
        Path::new(prefix)
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == env)
            .unwrap_or(false)
            && Path::new(prefix)
                .parent()
                .and_then(|p| p.file_name())
                .map(|p| p == "envs")
                .unwrap_or(false)
    }
}

#[async_trait]
impl EnvironmentManager for CondaEnvironment {
    async fn exists(&self, env: &str) -> Result<bool, DomainError> {
        let inv = self.conda().args(["env", "list", "--json"]).quiet();
        let output = self.executor.run(&inv).await?.check("query", &inv)?;
        let list: EnvList = serde_json::from_str(&output.stdout)?;
        let found = list.envs.iter().any(|prefix| Self::env_matches(prefix, env));
        debug!(env, found, "Checked environment existence");
        Ok(found)
    }

    async fn create(&self, env: &str, spec_file: &Path) -> Result<(), DomainError> {
        info!(env, spec = ?spec_file, "Creating environment");
        let inv = self
            .conda()
            .args(["env", "create", "-n", env, "-f"])
            .arg(spec_file.display().to_string());
        self.executor.run(&inv).await?.check("RUNTIME_ENVIRONMENT", &inv)?;
        Ok(())
    }

    async fn remove(&self, env: &str) -> Result<(), DomainError> {
        info!(env, "Removing environment");
        let inv = self.conda().args(["env", "remove", "-n", env, "-y"]);
        self.executor.run(&inv).await?.check("RUNTIME_ENVIRONMENT", &inv)?;
        Ok(())
    }

    async fn installed_versions(
        &self,
        env: &str,
        packages: &[PackageRef],
    ) -> Result<InstalledVersions, DomainError> {
        let request = json!(packages
            .iter()
            .map(|p| json!({"import": p.import_name, "dist": p.distribution}))
            .collect::<Vec<_>>());
        let inv = self
            .conda_run(env)
            .args([self.runtime.as_str(), "-c", VERSION_QUERY])
            .arg(request.to_string())
            .quiet();
        let output = self.executor.run(&inv).await?;
        if !output.success() {
            warn!(env, status = %output.status_text(), "Runtime could not be started; treating packages as missing");
            return Ok(InstalledVersions::default());
        }
        Self::parse_query_output(&output.stdout)
    }

    async fn install_pinned(
        &self,
        env: &str,
        package: &PackageRef,
        version: &str,
    ) -> Result<(), DomainError> {
        let inv = match &package.channel {
            Some(channel) => self
                .conda()
                .args(["install", "-n", env, "-y", "-c", channel.as_str()])
                .arg(format!("{}={}", package.distribution, version)),
            None => self
                .conda_run(env)
                .args([self.runtime.as_str(), "-m", "pip", "install"])
                .arg(format!("{}=={}", package.distribution, version)),
        };
        info!(env, package = %package.import_name, version, "Installing pinned package");
        self.executor
            .run(&inv)
            .await?
            .check("PACKAGE_RECONCILIATION", &inv)?;
        Ok(())
    }

    async fn persisted_vars(&self, env: &str) -> Result<BTreeMap<String, String>, DomainError> {
        let inv = self
            .conda()
            .args(["env", "config", "vars", "list", "-n", env, "--json"])
            .quiet();
        let output = self.executor.run(&inv).await?.check("query", &inv)?;
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    async fn persist_vars(
        &self,
        env: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), DomainError> {
        let inv = self
            .conda()
            .args(["env", "config", "vars", "set", "-n", env])
            .args(vars.iter().map(|(k, v)| format!("{}={}", k, v)));
        self.executor.run(&inv).await?.check("ENV_VARS", &inv)?;
        info!(env, count = vars.len(), "Variables persisted; reactivation required");
        Ok(())
    }

    async fn reactivate(&self, env: &str) -> Result<BTreeMap<String, String>, DomainError> {
        // Each `conda run` deactivates the caller's state and performs a fresh
        // activation of `env`, which is what loads persisted variables.
        let inv = self.conda_run(env).arg("env").quiet();
        let output = self.executor.run(&inv).await?.check("ENV_VARS", &inv)?;
        let vars = Self::parse_environment(&output.stdout);
        debug!(env, count = vars.len(), "Environment activated");
        Ok(vars)
    }

    async fn run_in(&self, env: &str, command: &[String]) -> Result<(), DomainError> {
        let inv = self.conda_run(env).args(command.iter().cloned());
        self.executor.run(&inv).await?.check("ASSET_PREFETCH", &inv)?;
        Ok(())
    }
}
