//! In-memory fakes of the ports plus a filesystem fixture for pipeline tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::app::context::{assemble_bom, InstallContext, ResolvedPaths, RunOptions};
use crate::domain::{DomainError, Identity, InstallerConfig, RecreatePolicy};
use crate::ports::{
    CommandExecutor, CommandOutput, EnvironmentManager, InstalledVersions, Invocation, PackageRef,
    SystemPackageManager,
};

pub const SPEC: &str = "\
name: fasterwhisper
dependencies:
  - python=3.11
  - pytorch::pytorch=2.5.1   # cuda build
  - pip:
    - numpy==1.26.4
";

const LAUNCHER: &str = "#!/bin/bash\ncd \"${SCRIPT_DIR}\"\nexec conda run -n ${ENV_NAME} python dictate.py \"$@\"\n";
const DESKTOP: &str = "[Desktop Entry]\nType=Application\nExec=${SCRIPT_DIR}/start_dictate.sh\nPath=${USER_HOME}\n";

/// Script directory and home directory inside one temp dir.
pub struct Fixture {
    _dir: TempDir,
    pub script_dir: PathBuf,
    pub home: PathBuf,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let script_dir = dir.path().join("dictate");
    let home = dir.path().join("home/ana");
    fs::create_dir_all(script_dir.join("templates")).unwrap();
    fs::create_dir_all(&home).unwrap();
    fs::write(script_dir.join("environment.yml"), SPEC).unwrap();
    fs::write(script_dir.join("templates/start_dictate.sh.in"), LAUNCHER).unwrap();
    fs::write(script_dir.join("templates/dictate.desktop.in"), DESKTOP).unwrap();
    Fixture {
        _dir: dir,
        script_dir,
        home,
    }
}

impl Fixture {
    pub fn identity(&self) -> Identity {
        Identity {
            user: "ana".to_string(),
            uid: 1000,
            gid: 1000,
            home: self.home.clone(),
            elevated: false,
        }
    }

    pub fn context(&self) -> InstallContext {
        self.context_with(RunOptions {
            recreate: RecreatePolicy::Never,
            ..Default::default()
        })
    }

    pub fn context_with(&self, options: RunOptions) -> InstallContext {
        self.context_from(InstallerConfig::default(), options)
    }

    pub fn context_from(&self, config: InstallerConfig, options: RunOptions) -> InstallContext {
        let paths = ResolvedPaths {
            home: self.home.clone(),
            script_dir: self.script_dir.clone(),
            env_name: config.environment.name.clone(),
            spec_file: self.script_dir.join("environment.yml"),
        };
        let bom = assemble_bom(&config, &paths, SPEC).unwrap();
        InstallContext::new(bom, config, paths, options)
    }

    pub fn launcher(&self) -> PathBuf {
        self.script_dir.join("start_dictate.sh")
    }

    pub fn desktop_entry(&self) -> PathBuf {
        self.home.join(".local/share/applications/dictate.desktop")
    }

    pub fn transcripts(&self) -> PathBuf {
        self.home.join("Music/dictate/transcripts")
    }
}

/// Replays canned outputs and records every invocation.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<Invocation>>,
    /// Commands requiring this manager fail as if its initializer broke.
    unavailable: Option<String>,
}

impl ScriptedExecutor {
    pub fn new(responses: Vec<CommandOutput>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn without_manager(manager: &str) -> Self {
        Self {
            unavailable: Some(manager.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DomainError> {
        self.calls.lock().push(invocation.clone());
        if invocation.requires.is_some() && invocation.requires == self.unavailable {
            return Err(DomainError::PrivilegeEnvironment {
                manager: invocation.requires.clone().unwrap_or_default(),
                searched: vec!["/home/ana/miniconda3/etc/profile.d/conda.sh".to_string()],
            });
        }
        Ok(self.responses.lock().pop_front().unwrap_or(CommandOutput {
            code: Some(0),
            ..Default::default()
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvState {
    pub exists: bool,
    pub runtime: Option<String>,
    pub packages: BTreeMap<String, String>,
    pub persisted: BTreeMap<String, String>,
    /// Runtime a fresh `create` provisions.
    pub create_runtime: Option<String>,
    /// Packages a fresh `create` provisions.
    pub create_packages: BTreeMap<String, String>,
    /// Installs of these exit nonzero.
    pub failing: BTreeSet<String>,
    /// Installs of these succeed without changing anything.
    pub ineffective: BTreeSet<String>,
    pub prefetch_fails: bool,
    pub mutations: Vec<String>,
}

/// Environment manager backed by an in-memory state.
pub struct FakeEnvironment {
    state: Mutex<EnvState>,
}

impl Default for FakeEnvironment {
    fn default() -> Self {
        Self::with_state(EnvState {
            create_runtime: Some("3.11.9".to_string()),
            create_packages: BTreeMap::from([
                ("torch".to_string(), "2.5.1".to_string()),
                ("numpy".to_string(), "1.26.4".to_string()),
            ]),
            ..Default::default()
        })
    }
}

impl FakeEnvironment {
    pub fn with_state(state: EnvState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// An existing environment holding exactly what `create` provisions.
    pub fn provisioned() -> Self {
        let fake = Self::default();
        {
            let mut s = fake.state.lock();
            s.exists = true;
            s.runtime = s.create_runtime.clone();
            s.packages = s.create_packages.clone();
        }
        fake
    }

    pub fn update(&self, f: impl FnOnce(&mut EnvState)) {
        f(&mut self.state.lock());
    }

    pub fn state(&self) -> EnvState {
        self.state.lock().clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().mutations.clone()
    }
}

#[async_trait]
impl EnvironmentManager for FakeEnvironment {
    async fn exists(&self, _env: &str) -> Result<bool, DomainError> {
        Ok(self.state.lock().exists)
    }

    async fn create(&self, env: &str, _spec_file: &Path) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        s.mutations.push(format!("create {}", env));
        s.exists = true;
        s.runtime = s.create_runtime.clone();
        s.packages = s.create_packages.clone();
        Ok(())
    }

    async fn remove(&self, env: &str) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        s.mutations.push(format!("remove {}", env));
        s.exists = false;
        s.runtime = None;
        s.packages.clear();
        s.persisted.clear();
        Ok(())
    }

    async fn installed_versions(
        &self,
        _env: &str,
        packages: &[PackageRef],
    ) -> Result<InstalledVersions, DomainError> {
        let s = self.state.lock();
        Ok(InstalledVersions {
            runtime: s.runtime.clone(),
            packages: packages
                .iter()
                .filter_map(|p| {
                    s.packages
                        .get(&p.import_name)
                        .map(|v| (p.import_name.clone(), v.clone()))
                })
                .collect(),
        })
    }

    async fn install_pinned(
        &self,
        _env: &str,
        package: &PackageRef,
        version: &str,
    ) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        s.mutations
            .push(format!("install {}={}", package.distribution, version));
        if s.failing.contains(&package.import_name) {
            return Err(DomainError::install_failure(
                "PACKAGE_RECONCILIATION",
                format!("install {}={}", package.distribution, version),
                "exit code 1",
                "resolver conflict",
            ));
        }
        if !s.ineffective.contains(&package.import_name) {
            s.packages
                .insert(package.import_name.clone(), version.to_string());
        }
        Ok(())
    }

    async fn persisted_vars(&self, _env: &str) -> Result<BTreeMap<String, String>, DomainError> {
        Ok(self.state.lock().persisted.clone())
    }

    async fn persist_vars(
        &self,
        _env: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        s.mutations.push(format!(
            "persist {}",
            vars.keys().cloned().collect::<Vec<_>>().join(",")
        ));
        s.persisted.extend(vars.clone());
        Ok(())
    }

    async fn reactivate(&self, _env: &str) -> Result<BTreeMap<String, String>, DomainError> {
        Ok(self.state.lock().persisted.clone())
    }

    async fn run_in(&self, _env: &str, command: &[String]) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        s.mutations.push(format!("run {}", command.join(" ")));
        if s.prefetch_fails {
            return Err(DomainError::install_failure(
                "ASSET_PREFETCH",
                command.join(" "),
                "exit code 1",
                "network unreachable",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemState {
    pub installed: BTreeMap<String, String>,
    pub fail: bool,
    /// A request naming any of these fails as a whole.
    pub unavailable: BTreeSet<String>,
    pub installs: Vec<String>,
}

/// OS package database backed by an in-memory map.
#[derive(Default)]
pub struct FakeSystem {
    state: Mutex<SystemState>,
}

impl FakeSystem {
    pub fn with_installed(names: &[&str]) -> Self {
        Self {
            state: Mutex::new(SystemState {
                installed: names
                    .iter()
                    .map(|n| (n.to_string(), "1.0-1".to_string()))
                    .collect(),
                ..Default::default()
            }),
        }
    }

    pub fn failing() -> Self {
        Self {
            state: Mutex::new(SystemState {
                fail: true,
                ..Default::default()
            }),
        }
    }

    pub fn without(names: &[&str]) -> Self {
        Self {
            state: Mutex::new(SystemState {
                unavailable: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    pub fn installs(&self) -> Vec<String> {
        self.state.lock().installs.clone()
    }
}

#[async_trait]
impl SystemPackageManager for FakeSystem {
    async fn installed_version(&self, name: &str) -> Result<Option<String>, DomainError> {
        Ok(self.state.lock().installed.get(name).cloned())
    }

    async fn install(&self, packages: &[(String, Option<String>)]) -> Result<(), DomainError> {
        let mut s = self.state.lock();
        if s.fail || packages.iter().any(|(name, _)| s.unavailable.contains(name)) {
            return Err(DomainError::install_failure(
                "SYSTEM_PACKAGES",
                "apt-get install -y",
                "exit code 100",
                "E: Unable to locate package",
            ));
        }
        for (name, version) in packages {
            s.installs.push(name.clone());
            s.installed.insert(
                name.clone(),
                version.clone().unwrap_or_else(|| "1.0-1".to_string()),
            );
        }
        Ok(())
    }
}
