use super::config::ProfilesConfig;

/// Which BOM source variant a run installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Gpu,
    Cpu,
}

impl Profile {
    /// Spec file (relative to the script directory) for this profile.
    pub fn spec_file<'a>(&self, profiles: &'a ProfilesConfig) -> &'a str {
        match self {
            Profile::Gpu => &profiles.gpu,
            Profile::Cpu => &profiles.cpu,
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Gpu => write!(f, "gpu"),
            Profile::Cpu => write!(f, "cpu"),
        }
    }
}

/// Operator choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileChoice {
    /// Probe for accelerator hardware.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Result of probing for accelerator hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorProfile {
    /// Device descriptions reported by the driver, one per GPU.
    pub devices: Vec<String>,
    /// Whether the kernel driver is loaded.
    pub driver_loaded: bool,
}

impl AcceleratorProfile {
    pub fn none() -> Self {
        Self {
            devices: Vec::new(),
            driver_loaded: false,
        }
    }

    pub fn has_gpu(&self) -> bool {
        !self.devices.is_empty() || self.driver_loaded
    }

    /// Parse `nvidia-smi -L` output: one `GPU <n>: <name> (UUID: ...)` line per device.
    pub fn parse_device_listing(listing: &str) -> Vec<String> {
        listing
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("GPU "))
            .map(|line| match line.split_once(": ") {
                Some((_, name)) => name
                    .split(" (UUID")
                    .next()
                    .unwrap_or(name)
                    .trim()
                    .to_string(),
                None => line.to_string(),
            })
            .collect()
    }
}

impl ProfileChoice {
    /// Resolve the operator choice against the detected hardware.
    pub fn resolve(&self, detected: &AcceleratorProfile) -> Profile {
        match self {
            ProfileChoice::Gpu => Profile::Gpu,
            ProfileChoice::Cpu => Profile::Cpu,
            ProfileChoice::Auto if detected.has_gpu() => Profile::Gpu,
            ProfileChoice::Auto => Profile::Cpu,
        }
    }
}
