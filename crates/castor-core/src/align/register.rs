//! Registration of every frame of a cube onto a common reference.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::info;

use crate::config::{DetectionConfig, FailedFramePolicy, Precision, RegistrationConfig};
use crate::consts::{PARALLEL_FRAME_THRESHOLD, STATUS_COLUMN_WIDTH};
use crate::detection::extract_sources;
use crate::error::{CastorError, GeometrySolverError, PipelineWarning, Reported, Result};
use crate::frame::{ImageCube, Point};
use crate::io::cache::{ensure_writable, read_timestamps, timestamp_column, write_atomic};
use crate::io::fits::{FitsReader, TableColumn};
use crate::pipeline::{PipelineStage, ProgressReporter};

use super::solver::TransformSolver;
use super::transform::AffineTransform;
use super::warp::affine_warp;

/// How the control points of the reference image are found.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ReferenceSources {
    /// The solver's own source finder.
    #[default]
    Solver,
    /// The flux-sorted source extractor at the given threshold (in σ).
    Extractor { threshold_sigma: f32 },
}

/// Outcome of the registration of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame is the reference itself and was left untouched.
    Reference,
    /// The frame was resampled onto the reference grid.
    Aligned,
    /// No transform could be estimated; see [`FailedFramePolicy`] for its pixels.
    Failed,
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Aligned => write!(f, "aligned"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for FrameStatus {
    type Err = CastorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "reference" => Ok(Self::Reference),
            "aligned" => Ok(Self::Aligned),
            "failed" => Ok(Self::Failed),
            other => Err(CastorError::InvalidFits(format!(
                "unknown frame status '{other}'"
            ))),
        }
    }
}

/// Column of the per-frame status in saved cubes.
pub const STATUS_COLUMN: &str = "STATUS";

/// Columns of the transform coefficients in saved cubes, in row-major
/// order of the 2x3 matrix.
pub const TRANSFORM_COLUMNS: [&str; 6] = ["A", "B", "TX", "C", "D", "TY"];

/// A registered cube with the transform and status of every frame.
#[derive(Clone, Debug)]
pub struct RegisteredCube {
    pub cube: ImageCube,
    pub transforms: Vec<AffineTransform>,
    pub status: Vec<FrameStatus>,
}

impl RegisteredCube {
    pub fn len(&self) -> usize {
        self.cube.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cube.is_empty()
    }

    /// Indices of frames whose transform could not be estimated.
    pub fn failed_frames(&self) -> Vec<usize> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == FrameStatus::Failed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Write the cube atomically, with the timestamp, status and transform
    /// coefficients of every frame as columns of the `FRAMES` table.
    pub fn save(&self, path: &Path, overwrite: bool, precision: Precision) -> Result<()> {
        ensure_writable(&[path], overwrite)?;
        let status = self.status.iter().map(|s| s.to_string()).collect();
        let mut columns = vec![
            timestamp_column(self.cube.timestamps()),
            TableColumn::text(STATUS_COLUMN, STATUS_COLUMN_WIDTH, status),
        ];
        for (k, name) in TRANSFORM_COLUMNS.iter().enumerate() {
            let values = self
                .transforms
                .iter()
                .map(|t| t.matrix()[k / 3][k % 3])
                .collect();
            columns.push(TableColumn::float(name, values));
        }
        write_atomic(path, self.cube.data(), &columns, overwrite, precision)
    }

    /// Read a cube written by [`RegisteredCube::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let missing = |keyword: &str| CastorError::MissingKeyword {
            path: path.to_path_buf(),
            keyword: keyword.into(),
        };

        let mut reader = FitsReader::open(path)?;
        let data = reader.read_cube()?;
        let timestamps = read_timestamps(&mut reader)?;
        let status = reader
            .read_text_column(STATUS_COLUMN)?
            .ok_or_else(|| missing(STATUS_COLUMN))?
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<FrameStatus>>>()?;
        let mut coefficients = Vec::with_capacity(TRANSFORM_COLUMNS.len());
        for name in TRANSFORM_COLUMNS {
            coefficients.push(reader.read_float_column(name)?.ok_or_else(|| missing(name))?);
        }

        let cube = ImageCube::new(data, timestamps)?;
        let transforms = (0..cube.len())
            .map(|i| {
                let c = |k: usize| coefficients[k][i];
                AffineTransform::from_matrix([[c(0), c(1), c(2)], [c(3), c(4), c(5)]])
            })
            .collect();
        Ok(Self {
            cube,
            transforms,
            status,
        })
    }
}

/// Control points of `image`, brightest first.
pub fn reference_sources(
    image: &Array2<f32>,
    method: ReferenceSources,
    config: &RegistrationConfig,
    solver: &dyn TransformSolver,
) -> Vec<Point> {
    match method {
        ReferenceSources::Solver => solver.find_sources(image),
        ReferenceSources::Extractor { threshold_sigma } => {
            let detection = DetectionConfig {
                threshold_sigma,
                min_area: config.min_area,
                ..DetectionConfig::default()
            };
            let mut points = extract_sources(image, &detection).coordinates();
            points.reverse();
            points
        }
    }
}

/// Align every frame of `cube` onto `reference`, or onto the first frame when
/// no reference image is given.
///
/// A frame whose transform cannot be estimated gets the invalid transform, a
/// [`PipelineWarning::RegistrationFailed`] warning and the `Failed` status;
/// the rest of the batch is unaffected.
pub fn register_stars(
    cube: &ImageCube,
    reference: Option<&Array2<f32>>,
    reference_method: ReferenceSources,
    config: &RegistrationConfig,
    solver: &dyn TransformSolver,
    reporter: &dyn ProgressReporter,
) -> Result<Reported<RegisteredCube>> {
    if cube.is_empty() {
        return Err(CastorError::EmptyInput {
            input: "image cube".into(),
        });
    }
    let shape = cube.frame_shape();
    if let Some(r) = reference {
        if r.dim() != shape {
            return Err(CastorError::ShapeMismatch {
                expected: shape,
                found: r.dim(),
            });
        }
    }

    let first_is_reference = reference.is_none();
    let reference_image = match reference {
        Some(r) => r.clone(),
        None => cube.frame(0).to_owned(),
    };
    let reference_points = reference_sources(&reference_image, reference_method, config, solver);
    info!(
        frames = cube.len(),
        reference_sources = reference_points.len(),
        "Registering frames"
    );

    reporter.begin_stage(PipelineStage::Aligning, Some(cube.len()));
    let counter = AtomicUsize::new(0);
    let process = |i: usize| -> FrameOutcome {
        let frame = cube.frame(i);
        let outcome = if first_is_reference && i == 0 {
            FrameOutcome::reference(frame)
        } else {
            let estimate = solver
                .estimate_image(&frame.to_owned(), &reference_points)
                .and_then(|t| {
                    if t.is_valid() {
                        Ok(t)
                    } else {
                        Err(GeometrySolverError::NonFinite)
                    }
                });
            FrameOutcome::from_estimate(frame, estimate, config.failed_frame_policy)
        };
        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.advance(done);
        outcome
    };

    let outcomes: Vec<FrameOutcome> = if cube.len() >= PARALLEL_FRAME_THRESHOLD {
        (0..cube.len()).into_par_iter().map(&process).collect()
    } else {
        (0..cube.len()).map(&process).collect()
    };
    reporter.finish_stage();

    let (h, w) = shape;
    let mut data = Array3::<f32>::zeros((cube.len(), h, w));
    let mut transforms = Vec::with_capacity(cube.len());
    let mut status = Vec::with_capacity(cube.len());
    let mut warnings = Vec::new();
    for (i, outcome) in outcomes.into_iter().enumerate() {
        data.index_axis_mut(Axis(0), i).assign(&outcome.pixels);
        transforms.push(outcome.transform);
        status.push(outcome.status);
        if let Some(err) = outcome.error {
            warnings.push(
                PipelineWarning::RegistrationFailed {
                    frame: i,
                    message: err.to_string(),
                }
                .emit(),
            );
        }
    }

    info!(
        aligned = status.iter().filter(|s| **s == FrameStatus::Aligned).count(),
        failed = warnings.len(),
        "Registration complete"
    );
    let cube = ImageCube::new(data, cube.timestamps().to_vec())?;
    Ok(Reported::with_warnings(
        RegisteredCube {
            cube,
            transforms,
            status,
        },
        warnings,
    ))
}

struct FrameOutcome {
    pixels: Array2<f32>,
    transform: AffineTransform,
    status: FrameStatus,
    error: Option<GeometrySolverError>,
}

impl FrameOutcome {
    fn reference(frame: ArrayView2<'_, f32>) -> Self {
        Self {
            pixels: frame.to_owned(),
            transform: AffineTransform::identity(),
            status: FrameStatus::Reference,
            error: None,
        }
    }

    fn from_estimate(
        frame: ArrayView2<'_, f32>,
        estimate: std::result::Result<AffineTransform, GeometrySolverError>,
        policy: FailedFramePolicy,
    ) -> Self {
        match estimate {
            Ok(transform) => Self {
                pixels: affine_warp(frame, &transform),
                transform,
                status: FrameStatus::Aligned,
                error: None,
            },
            Err(err) => Self {
                pixels: match policy {
                    FailedFramePolicy::PassThrough => frame.to_owned(),
                    FailedFramePolicy::MarkInvalid => Array2::from_elem(frame.dim(), f32::NAN),
                },
                transform: AffineTransform::invalid(),
                status: FrameStatus::Failed,
                error: Some(err),
            },
        }
    }
}
