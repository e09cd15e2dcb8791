pub mod context;
pub mod controller;
pub mod pipeline;
pub mod validator;

#[cfg(test)]
pub mod testing;

pub use context::{assemble_bom, InstallContext, ResolvedPaths, RunOptions};
pub use controller::{ControllerOptions, InstallController};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use validator::Validator;
