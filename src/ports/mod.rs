pub mod config;
pub mod environment;
pub mod executor;
pub mod hardware;

pub use config::ConfigStore;
pub use environment::{EnvironmentManager, InstalledVersions, PackageRef, SystemPackageManager};
pub use executor::{CommandExecutor, CommandOutput, Echo, Invocation, RunAs};
pub use hardware::HardwareDetector;
