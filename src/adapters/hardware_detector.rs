use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::domain::{AcceleratorProfile, DomainError};
use crate::ports::HardwareDetector;

const DRIVER_VERSION_FILE: &str = "/proc/driver/nvidia/version";

/// NVIDIA accelerator detector.
///
/// Lists devices with `nvidia-smi -L` and checks whether the kernel driver
/// is loaded. Results are cached after the first detection.
pub struct AcceleratorDetector {
    profile: OnceLock<AcceleratorProfile>,
    driver_file: PathBuf,
}

impl AcceleratorDetector {
    /// Create a new hardware detector.
    pub fn new() -> Self {
        Self::with_driver_file(DRIVER_VERSION_FILE)
    }

    fn with_driver_file(path: impl Into<PathBuf>) -> Self {
        Self {
            profile: OnceLock::new(),
            driver_file: path.into(),
        }
    }

    fn list_devices() -> Vec<String> {
        match Command::new("nvidia-smi").arg("-L").output() {
            Ok(output) if output.status.success() => {
                AcceleratorProfile::parse_device_listing(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = ?output.status.code(), "nvidia-smi reported no devices");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "nvidia-smi not available");
                Vec::new()
            }
        }
    }

    fn driver_loaded(path: &Path) -> bool {
        path.is_file()
    }

    /// Perform the actual hardware detection.
    fn detect_hardware(&self) -> AcceleratorProfile {
        let profile = AcceleratorProfile {
            devices: Self::list_devices(),
            driver_loaded: Self::driver_loaded(&self.driver_file),
        };

        info!(
            devices = ?profile.devices,
            driver_loaded = profile.driver_loaded,
            gpu = profile.has_gpu(),
            "Accelerator profile detected"
        );

        profile
    }
}

impl Default for AcceleratorDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareDetector for AcceleratorDetector {
    fn detect(&self) -> Result<AcceleratorProfile, DomainError> {
        Ok(self.profile.get_or_init(|| self.detect_hardware()).clone())
    }
}
