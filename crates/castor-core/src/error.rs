use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum CastorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{input} is empty")]
    EmptyInput { input: String },

    #[error("Geometry solver failed: {0}")]
    GeometrySolver(#[from] GeometrySolverError),

    #[error("Could not persist {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("Output file '{}' exists, overwrite it explicitly", path.display())]
    OutputConflict { path: PathBuf },

    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Missing header keyword {keyword} in {}", path.display())]
    MissingKeyword { path: PathBuf, keyword: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Cube has {frames} frames but {timestamps} timestamps")]
    LengthMismatch { frames: usize, timestamps: usize },

    #[error("Master flat has zero mean after dark subtraction")]
    DegenerateFlat,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CastorError {
    /// Short name of the error class, used in warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "IoError",
            Self::EmptyInput { .. } => "EmptyInputError",
            Self::GeometrySolver(_) => "GeometrySolverError",
            Self::Persistence { .. } => "PersistenceError",
            Self::OutputConflict { .. } => "OutputConflictError",
            Self::Fits(_) => "FitsError",
            Self::InvalidFits(_) => "InvalidFitsError",
            Self::MissingKeyword { .. } => "MissingKeywordError",
            Self::InvalidTimestamp(_) => "InvalidTimestampError",
            Self::ShapeMismatch { .. } => "ShapeMismatchError",
            Self::LengthMismatch { .. } => "LengthMismatchError",
            Self::DegenerateFlat => "DegenerateFlatError",
            Self::Config(_) => "ConfigError",
        }
    }
}

/// Failure of the geometric transform estimator on a single frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometrySolverError {
    #[error("not enough sources to build asterisms ({found} found, {required} required)")]
    TooFewSources { found: usize, required: usize },

    #[error("no asterism of the frame matches the reference")]
    NoMatch,

    #[error("best transform only matched {found} sources ({required} required)")]
    TooFewInliers { found: usize, required: usize },

    #[error("degenerate source geometry")]
    Degenerate,

    #[error("estimated transform is not finite")]
    NonFinite,
}

pub type Result<T> = std::result::Result<T, CastorError>;

/// Recoverable condition raised while processing a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineWarning {
    /// A calibration set had no frames and a default value was used instead.
    EmptyCalibration { input: String, default: f64 },
    /// The transform of one frame could not be estimated.
    RegistrationFailed { frame: usize, message: String },
    /// A freshly computed cube could not be written to disk.
    PersistenceFailed {
        path: PathBuf,
        kind: String,
        message: String,
    },
}

impl PipelineWarning {
    /// Log the warning and hand it back, so it can be pushed to a collection.
    pub(crate) fn emit(self) -> Self {
        warn!("{}", self);
        self
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCalibration { input, default } => {
                write!(f, "{input} is empty, using default value {default}")
            }
            Self::RegistrationFailed { frame, message } => write!(f, "Image {frame}: {message}"),
            Self::PersistenceFailed {
                path,
                kind,
                message,
            } => write!(
                f,
                "{kind} occurred while saving {}: {message}",
                path.display()
            ),
        }
    }
}

/// A value together with the warnings raised while producing it.
#[derive(Clone, Debug)]
pub struct Reported<T> {
    pub value: T,
    pub warnings: Vec<PipelineWarning>,
}

impl<T> Reported<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<PipelineWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reported<U> {
        Reported {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    pub fn into_parts(self) -> (T, Vec<PipelineWarning>) {
        (self.value, self.warnings)
    }
}
