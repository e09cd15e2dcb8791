use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Runtime environment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Name of the managed environment.
    pub name: String,
    /// Package name of the language runtime inside spec files.
    pub runtime: String,
    /// Tool manager that owns the environment (must match a known manager).
    pub manager: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "fasterwhisper".to_string(),
            runtime: "python".to_string(),
            manager: "conda".to_string(),
        }
    }
}

/// Spec files per accelerator profile, relative to the script directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub gpu: String,
    pub cpu: String,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            gpu: "environment.yml".to_string(),
            cpu: "environment-cpu.yml".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A required OS package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPackageConfig {
    pub name: String,
    /// Exact version, when pinned.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default)]
    pub note: String,
}

impl SystemPackageConfig {
    fn new(name: &str, note: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            critical: true,
            note: note.to_string(),
        }
    }
}

/// A variable persisted in the environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarConfig {
    pub name: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default)]
    pub note: String,
}

/// A directory that must exist. `path` may use template placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default)]
    pub note: String,
}

/// What a rendered artifact is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    /// Rendered during GENERATED_FILES.
    Launcher,
    /// Rendered and registered during DESKTOP_INTEGRATION.
    Desktop,
}

/// A file rendered from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,
    /// Template path, relative to the script directory.
    pub template: String,
    /// Output path; may use template placeholders.
    pub output: String,
    /// Octal permission bits, e.g. "755".
    #[serde(default = "ArtifactConfig::default_mode")]
    pub mode: String,
    pub role: ArtifactRole,
    #[serde(default = "default_true")]
    pub critical: bool,
}

impl ArtifactConfig {
    fn default_mode() -> String {
        "644".to_string()
    }

    /// Parse the octal mode string.
    pub fn mode_bits(&self) -> Option<u32> {
        u32::from_str_radix(self.mode.trim_start_matches("0o"), 8).ok()
    }
}

/// An extra per-user tool manager whose initializers must be sourced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolManagerConfig {
    pub name: String,
    /// Relative paths resolve against the invoking user's home.
    pub initializers: Vec<String>,
}

/// An asset pre-fetch command run inside the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub critical: bool,
}

/// Desktop registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    /// Command run after desktop artifacts are written; placeholders allowed.
    pub register: Vec<String>,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            register: vec![
                "update-desktop-database".to_string(),
                "${USER_HOME}/.local/share/applications".to_string(),
            ],
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Directory for install logs, relative to the script directory.
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
        }
    }
}

/// Package identity settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    /// Additional distribution → import name remaps.
    pub remap: BTreeMap<String, String>,
}

/// Main installer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub environment: EnvironmentConfig,
    pub profiles: ProfilesConfig,
    pub system_packages: Vec<SystemPackageConfig>,
    pub env_vars: Vec<EnvVarConfig>,
    pub directories: Vec<DirectoryConfig>,
    pub artifacts: Vec<ArtifactConfig>,
    pub tool_managers: Vec<ToolManagerConfig>,
    pub prefetch: Vec<PrefetchConfig>,
    pub desktop: DesktopConfig,
    pub logging: LoggingConfig,
    pub packages: PackagesConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            environment: EnvironmentConfig::default(),
            profiles: ProfilesConfig::default(),
            system_packages: vec![
                SystemPackageConfig::new("libportaudio2", "audio capture backend"),
                SystemPackageConfig::new("xclip", "clipboard access for auto-paste"),
                SystemPackageConfig::new("xdotool", "simulated paste keystroke"),
            ],
            env_vars: vec![
                EnvVarConfig {
                    name: "TTKBOOTSTRAP_FONT_MANAGER".to_string(),
                    value: "tk".to_string(),
                    critical: true,
                    note: "avoid font manager crash in the GUI theme".to_string(),
                },
                EnvVarConfig {
                    name: "KMP_DUPLICATE_LIB_OK".to_string(),
                    value: "TRUE".to_string(),
                    critical: true,
                    note: "duplicate OpenMP runtimes from torch and ctranslate2".to_string(),
                },
            ],
            directories: vec![
                DirectoryConfig {
                    name: "transcripts-dir".to_string(),
                    path: "${USER_HOME}/Music/dictate/transcripts".to_string(),
                    critical: true,
                    note: "saved transcripts".to_string(),
                },
                DirectoryConfig {
                    name: "app-logs-dir".to_string(),
                    path: "${USER_HOME}/Music/dictate/logs".to_string(),
                    critical: true,
                    note: "application logs".to_string(),
                },
            ],
            artifacts: vec![
                ArtifactConfig {
                    name: "launcher".to_string(),
                    template: "templates/start_dictate.sh.in".to_string(),
                    output: "${SCRIPT_DIR}/start_dictate.sh".to_string(),
                    mode: "755".to_string(),
                    role: ArtifactRole::Launcher,
                    critical: true,
                },
                ArtifactConfig {
                    name: "desktop-entry".to_string(),
                    template: "templates/dictate.desktop.in".to_string(),
                    output: "${USER_HOME}/.local/share/applications/dictate.desktop".to_string(),
                    mode: "644".to_string(),
                    role: ArtifactRole::Desktop,
                    critical: false,
                },
            ],
            tool_managers: Vec::new(),
            prefetch: vec![PrefetchConfig {
                name: "whisper-model".to_string(),
                command: vec![
                    "python".to_string(),
                    "-c".to_string(),
                    "from faster_whisper import WhisperModel; WhisperModel('large-v3-turbo', device='cpu', compute_type='int8')".to_string(),
                ],
                critical: false,
            }],
            desktop: DesktopConfig::default(),
            logging: LoggingConfig::default(),
            packages: PackagesConfig::default(),
        }
    }
}

impl InstallerConfig {
    /// Create a new InstallerConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
