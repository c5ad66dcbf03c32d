use std::path::{Path, PathBuf};

use tracing::info;

use crate::align::{register_stars, ReferenceSources, RegisteredCube, TransformSolver};
use crate::calibrate::{reduce, ReductionInputs};
use crate::config::CastorConfig;
use crate::error::{Reported, Result};
use crate::frame::ImageCube;
use crate::io::cache::{ensure_writable, load_cube, open_or_compute};

use super::types::{PipelineStage, ProgressReporter};

/// Default file names of the products of one target.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetLayout {
    root: PathBuf,
}

impl TargetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Calibrated, time-sorted science cube.
    pub fn prepared_cube(&self) -> PathBuf {
        self.root.join("cube_prepared.fits")
    }

    /// Registered science cube.
    pub fn aligned_cube(&self) -> PathBuf {
        self.root.join("cube_aligned.fits")
    }
}

/// Calibrate a science sequence, reusing `output` when it already exists.
pub fn run_preparation(
    inputs: &ReductionInputs,
    output: &Path,
    config: &CastorConfig,
    reporter: &dyn ProgressReporter,
) -> Result<Reported<ImageCube>> {
    let mut warnings = Vec::new();
    let prepared = open_or_compute(
        output,
        || {
            let (cube, reduce_warnings) = reduce(inputs, config.precision, reporter)?.into_parts();
            warnings = reduce_warnings;
            Ok(cube)
        },
        config.save,
        config.precision,
    )?;
    let (cube, save_warnings) = prepared.into_parts();
    warnings.extend(save_warnings);

    info!(
        path = %output.display(),
        frames = cube.len(),
        warnings = warnings.len(),
        "Preparation complete"
    );
    Ok(Reported::with_warnings(cube, warnings))
}

/// Register the cube at `input` onto its first frame and save it to `output`
/// together with the status and transform of every frame.
///
/// Fails before any computation when `output` exists and overwriting is not
/// allowed.
pub fn run_alignment(
    input: &Path,
    output: &Path,
    config: &CastorConfig,
    solver: &dyn TransformSolver,
    reporter: &dyn ProgressReporter,
) -> Result<Reported<RegisteredCube>> {
    ensure_writable(&[output], config.overwrite)?;

    let cube = load_cube(input)?;
    info!(path = %input.display(), frames = cube.len(), "Cube loaded");

    let registered = register_stars(
        &cube,
        None,
        ReferenceSources::Solver,
        &config.registration,
        solver,
        reporter,
    )?;

    reporter.begin_stage(PipelineStage::Writing, Some(1));
    registered
        .value
        .save(output, config.overwrite, config.precision)?;
    reporter.advance(1);
    reporter.finish_stage();

    Ok(registered)
}
