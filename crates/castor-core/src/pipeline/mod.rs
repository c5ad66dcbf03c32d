mod orchestrator;
mod types;

pub use orchestrator::{run_alignment, run_preparation, TargetLayout};
pub use types::{NoOpReporter, PipelineStage, ProgressReporter};
