//! Dark subtraction and flat-field correction of a science sequence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Array3, Axis, Zip};
use rayon::prelude::*;
use tracing::info;

use crate::config::Precision;
use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{CastorError, Reported, Result};
use crate::frame::{ImageCube, Timestamp};
use crate::io::files::{load_frame, load_timestamps, FrameSource};
use crate::pipeline::{PipelineStage, ProgressReporter};

use super::master::{create_master, MasterFrame};

/// Raw inputs of one science sequence.
#[derive(Clone, Debug)]
pub struct ReductionInputs {
    pub science: FrameSource,
    pub science_dark: FrameSource,
    pub flat: FrameSource,
    pub flat_dark: FrameSource,
}

/// Master dark and mean-normalized master flat used to correct a sequence.
#[derive(Clone, Debug)]
pub struct CalibrationSet {
    pub dark: MasterFrame,
    pub flat: MasterFrame,
}

impl CalibrationSet {
    /// Build the master frames at `precision`. Empty dark sets default to 0,
    /// an empty flat set to 1.
    pub fn build(
        inputs: &ReductionInputs,
        precision: Precision,
        reporter: &dyn ProgressReporter,
    ) -> Result<Reported<CalibrationSet>> {
        let master = |source: &FrameSource, default: f64| {
            create_master(source, Some(default), precision, reporter)
        };
        let (dark, mut warnings) = master(&inputs.science_dark, 0.0)?.into_parts();
        let (flat_dark, flat_dark_warnings) = master(&inputs.flat_dark, 0.0)?.into_parts();
        let (flat, flat_warnings) = master(&inputs.flat, 1.0)?.into_parts();
        warnings.extend(flat_dark_warnings);
        warnings.extend(flat_warnings);

        let flat = flat.subtract(&flat_dark)?.normalized()?;
        Ok(Reported::with_warnings(CalibrationSet { dark, flat }, warnings))
    }

    /// `(raw - dark) / flat`, pixel by pixel, evaluated in `f64`.
    pub fn apply(&self, raw: &Array2<f32>) -> Result<Array2<f32>> {
        let shape = raw.dim();
        let dark = self.dark.to_f64(shape)?;
        let flat = self.flat.to_f64(shape)?;
        let mut out = Array2::<f32>::zeros(shape);
        Zip::from(&mut out)
            .and(raw)
            .and(&dark)
            .and(&flat)
            .for_each(|o, &r, &d, &f| *o = ((r as f64 - d) / f) as f32);
        Ok(out)
    }
}

/// Calibrate a science sequence into a time-ordered cube, with master frames
/// built at `precision`.
///
/// Frames are sorted by their `DATE-OBS`; frames and timestamps share the
/// same permutation.
pub fn reduce(
    inputs: &ReductionInputs,
    precision: Precision,
    reporter: &dyn ProgressReporter,
) -> Result<Reported<ImageCube>> {
    let (calibration, warnings) =
        CalibrationSet::build(inputs, precision, reporter)?.into_parts();

    let science_files = inputs.science.resolve()?;
    if science_files.is_empty() {
        return Err(CastorError::EmptyInput {
            input: inputs.science.to_string(),
        });
    }

    let timestamps = load_timestamps(&science_files, reporter)?;
    let (files, timestamps) = sort_by_timestamp(science_files, timestamps);

    reporter.begin_stage(PipelineStage::Calibrating, Some(files.len()));
    let cube = calibrate_files(&files, &calibration, reporter)?;
    reporter.finish_stage();

    info!(frames = files.len(), "Science sequence calibrated");
    Ok(Reported::with_warnings(
        ImageCube::new(cube, timestamps)?,
        warnings,
    ))
}

/// Stable sort of files by acquisition time.
fn sort_by_timestamp(
    files: Vec<PathBuf>,
    timestamps: Vec<Timestamp>,
) -> (Vec<PathBuf>, Vec<Timestamp>) {
    let mut order: Vec<usize> = (0..files.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    order
        .into_iter()
        .map(|i| (files[i].clone(), timestamps[i]))
        .unzip()
}

fn calibrate_files(
    files: &[PathBuf],
    calibration: &CalibrationSet,
    reporter: &dyn ProgressReporter,
) -> Result<Array3<f32>> {
    let first = load_frame(&files[0], true)?;
    let (h, w) = first.data.dim();
    let mut cube = Array3::<f32>::zeros((files.len(), h, w));
    let counter = AtomicUsize::new(0);

    let process = |path: &PathBuf, mut out: ndarray::ArrayViewMut2<f32>| -> Result<()> {
        let raw = load_frame(path, true)?;
        if raw.data.dim() != (h, w) {
            return Err(CastorError::ShapeMismatch {
                expected: (h, w),
                found: raw.data.dim(),
            });
        }
        out.assign(&calibration.apply(&raw.data)?);
        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.advance(done);
        Ok(())
    };

    if files.len() >= PARALLEL_FRAME_THRESHOLD {
        cube.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(files.par_iter())
            .try_for_each(|(out, path)| process(path, out))?;
    } else {
        for (out, path) in cube.axis_iter_mut(Axis(0)).zip(files.iter()) {
            process(path, out)?;
        }
    }
    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(second: u32) -> Timestamp {
        Timestamp(
            NaiveDate::from_ymd_opt(2019, 8, 8)
                .unwrap()
                .and_hms_opt(21, 0, second)
                .unwrap(),
        )
    }

    #[test]
    fn test_sort_co_permutes_files() {
        let files = vec![
            PathBuf::from("c.fits"),
            PathBuf::from("a.fits"),
            PathBuf::from("b.fits"),
        ];
        let (files, stamps) = sort_by_timestamp(files, vec![ts(30), ts(10), ts(20)]);
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.fits"),
                PathBuf::from("b.fits"),
                PathBuf::from("c.fits")
            ]
        );
        assert_eq!(stamps, vec![ts(10), ts(20), ts(30)]);
    }

    #[test]
    fn test_apply_calibration() {
        let set = CalibrationSet {
            dark: MasterFrame::Constant(2.0),
            flat: MasterFrame::Double(Array2::from_shape_vec((1, 2), vec![0.5, 2.0]).unwrap()),
        };
        let raw = Array2::from_shape_vec((1, 2), vec![4.0f32, 6.0]).unwrap();
        let out = set.apply(&raw).unwrap();
        assert_eq!(out[[0, 0]], 4.0);
        assert_eq!(out[[0, 1]], 2.0);
    }
}
