pub mod conda;
pub mod config_store;
pub mod dpkg;
pub mod filesystem;
pub mod hardware_detector;
pub mod user_shell;

pub use conda::CondaEnvironment;
pub use config_store::TomlConfigStore;
pub use dpkg::DpkgPackages;
pub use filesystem::UserFiles;
pub use hardware_detector::AcceleratorDetector;
pub use user_shell::{resolve_invoking_identity, ToolManager, UserShellExecutor};
