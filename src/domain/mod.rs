pub mod bom;
pub mod compliance;
pub mod config;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod pipeline;
pub mod spec_file;
pub mod template;

pub use bom::{Bom, BomBuilder, BomEntry, BomKind, BomSource, SYSTEM_PACKAGE_PRESENT};
pub use compliance::{ComplianceReport, ValidationResult, ValidationStatus};
pub use config::{ArtifactConfig, ArtifactRole, InstallerConfig};
pub use error::DomainError;
pub use hardware::{AcceleratorProfile, Profile, ProfileChoice};
pub use identity::Identity;
pub use pipeline::{InstallState, RecreatePolicy, StepOutcome};
pub use template::{Placeholder, TemplateVars};
