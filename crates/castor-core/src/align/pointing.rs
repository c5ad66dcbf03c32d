//! Pointing stability of a sequence: drift, rotation and plate-scale
//! changes of every frame relative to the first one.

use rayon::prelude::*;
use tracing::info;

use crate::config::CastorConfig;
use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::detection::source_coordinates;
use crate::error::{CastorError, GeometrySolverError, PipelineWarning, Reported, Result};
use crate::frame::{ImageCube, Point};

use super::solver::TransformSolver;
use super::transform::AffineTransform;

/// Geometry of one frame relative to the first frame of the sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct PointingSample {
    /// Hours since the first frame.
    pub elapsed_hours: f64,
    pub scale: f64,
    pub rotation_deg: f64,
    /// (x, y) translation in pixels.
    pub translation_px: (f64, f64),
    /// (x, y) translation in arcseconds, when the instrument is known.
    pub translation_arcsec: Option<(f64, f64)>,
}

impl PointingSample {
    fn new(elapsed_hours: f64, transform: &AffineTransform, pixel_scale: Option<[f64; 2]>) -> Self {
        let (tx, ty) = transform.translation();
        Self {
            elapsed_hours,
            scale: transform.scale(),
            rotation_deg: transform.rotation().to_degrees(),
            translation_px: (tx, ty),
            translation_arcsec: pixel_scale.map(|[sx, sy]| (tx * sx, ty * sy)),
        }
    }

    /// False when the transform of the frame could not be estimated.
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite()
    }
}

/// Measure the transform of every frame (the first included) onto the
/// sources of the first frame.
///
/// Sources are extracted at `config.pointing.threshold_sigma`. A frame whose
/// transform cannot be estimated, or is not finite, yields an invalid sample
/// and a warning.
pub fn measure_pointing(
    cube: &ImageCube,
    config: &CastorConfig,
    solver: &dyn TransformSolver,
) -> Result<Reported<Vec<PointingSample>>> {
    if cube.is_empty() {
        return Err(CastorError::EmptyInput {
            input: "image cube".into(),
        });
    }

    let detection = config.pointing.detection(&config.detection);
    let brightest_first = |i: usize| -> Vec<Point> {
        let mut points = source_coordinates(&cube.frame(i).to_owned(), &detection);
        points.reverse();
        points
    };
    let reference = brightest_first(0);
    let estimate = |i: usize| -> std::result::Result<AffineTransform, GeometrySolverError> {
        solver
            .estimate(&brightest_first(i), &reference)
            .and_then(|t| {
                if t.is_valid() {
                    Ok(t)
                } else {
                    Err(GeometrySolverError::NonFinite)
                }
            })
    };

    let estimates: Vec<_> = if cube.len() >= PARALLEL_FRAME_THRESHOLD {
        (0..cube.len()).into_par_iter().map(&estimate).collect()
    } else {
        (0..cube.len()).map(&estimate).collect()
    };

    let pixel_scale = config.instrument.as_ref().map(|i| i.pixel_scale_arcsec());
    let origin = cube.timestamps()[0];
    let mut warnings = Vec::new();
    let samples: Vec<PointingSample> = estimates
        .into_iter()
        .enumerate()
        .map(|(i, estimate)| {
            let transform = estimate.unwrap_or_else(|err| {
                warnings.push(
                    PipelineWarning::RegistrationFailed {
                        frame: i,
                        message: err.to_string(),
                    }
                    .emit(),
                );
                AffineTransform::invalid()
            });
            let elapsed = cube.timestamps()[i].hours_since(&origin);
            PointingSample::new(elapsed, &transform, pixel_scale)
        })
        .collect();

    info!(
        frames = samples.len(),
        failed = warnings.len(),
        "Pointing measured"
    );
    Ok(Reported::with_warnings(samples, warnings))
}
