use crate::domain::{AcceleratorProfile, DomainError};

/// Port for hardware detection operations.
///
/// Implementations probe for accelerator hardware so the matching BOM
/// source variant can be chosen.
pub trait HardwareDetector: Send + Sync {
    /// Detect accelerator hardware.
    ///
    /// This may be cached after the first call.
    fn detect(&self) -> Result<AcceleratorProfile, DomainError>;
}
