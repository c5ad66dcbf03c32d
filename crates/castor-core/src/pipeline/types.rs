/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    LoadingHeaders,
    BuildingMaster,
    Calibrating,
    Aligning,
    Writing,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadingHeaders => write!(f, "Loading headers"),
            Self::BuildingMaster => write!(f, "Building master frame"),
            Self::Calibrating => write!(f, "Calibrating frames"),
            Self::Aligning => write!(f, "Aligning images"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Progress sink shared by the worker threads of a stage.
///
/// Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started; `total_items` is its frame count when known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// `items_done` frames of the current stage are finished.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// Progress reporter that ignores every event.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
