//! Master dark / master flat synthesis.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::Precision;
use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{CastorError, PipelineWarning, Reported, Result};
use crate::frame::Frame;
use crate::io::files::{load_frame, FrameSource, EXPOSURE_KEYWORD};
use crate::pipeline::{PipelineStage, ProgressReporter};

/// Average of a set of calibration exposures, or the constant that stands in
/// for an empty set.
///
/// Frames are stored at the precision they were built with.
#[derive(Clone, Debug, PartialEq)]
pub enum MasterFrame {
    Single(Array2<f32>),
    Double(Array2<f64>),
    Constant(f64),
}

impl MasterFrame {
    /// A frame holding `data` at `precision`.
    pub fn from_f64(data: Array2<f64>, precision: Precision) -> Self {
        match precision {
            Precision::Single => Self::Single(data.mapv(|v| v as f32)),
            Precision::Double => Self::Double(data),
        }
    }

    /// Storage precision, `None` for constants.
    pub fn precision(&self) -> Option<Precision> {
        match self {
            Self::Single(_) => Some(Precision::Single),
            Self::Double(_) => Some(Precision::Double),
            Self::Constant(_) => None,
        }
    }

    /// (height, width) of a frame, `None` for constants.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Self::Single(a) => Some(a.dim()),
            Self::Double(a) => Some(a.dim()),
            Self::Constant(_) => None,
        }
    }

    /// Pixel-wise `self - other`. Constants broadcast against frames; the
    /// result is double precision if either side is.
    pub fn subtract(&self, other: &MasterFrame) -> Result<MasterFrame> {
        let shape = match (self.shape(), other.shape()) {
            (Some(shape), _) | (None, Some(shape)) => shape,
            (None, None) => return Ok(Self::Constant(self.mean() - other.mean())),
        };
        let diff = self.to_f64(shape)? - other.to_f64(shape)?;
        let precision = match (self.precision(), other.precision()) {
            (Some(Precision::Double), _) | (_, Some(Precision::Double)) => Precision::Double,
            _ => Precision::Single,
        };
        Ok(Self::from_f64(diff, precision))
    }

    /// Mean sample value.
    pub fn mean(&self) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Single(a) => {
                a.iter().map(|&v| v as f64).sum::<f64>() / a.len().max(1) as f64
            }
            Self::Double(a) => a.sum() / a.len().max(1) as f64,
        }
    }

    /// Divide by the mean so the frame averages to one.
    ///
    /// Fails with [`CastorError::DegenerateFlat`] when the mean is zero or not finite.
    pub fn normalized(&self) -> Result<MasterFrame> {
        let mean = self.mean();
        if mean == 0.0 || !mean.is_finite() {
            return Err(CastorError::DegenerateFlat);
        }
        Ok(match self {
            Self::Constant(v) => Self::Constant(v / mean),
            Self::Single(a) => Self::Single(a.mapv(|v| (v as f64 / mean) as f32)),
            Self::Double(a) => Self::Double(a / mean),
        })
    }

    /// Samples as `f64` over a frame of the given (height, width).
    pub fn to_f64(&self, shape: (usize, usize)) -> Result<Array2<f64>> {
        match self {
            Self::Constant(v) => Ok(Array2::from_elem(shape, *v)),
            Self::Single(a) => {
                check_shape(shape, a.dim())?;
                Ok(a.mapv(|v| v as f64))
            }
            Self::Double(a) => {
                check_shape(shape, a.dim())?;
                Ok(a.clone())
            }
        }
    }
}

fn check_shape(expected: (usize, usize), found: (usize, usize)) -> Result<()> {
    if expected != found {
        return Err(CastorError::ShapeMismatch { expected, found });
    }
    Ok(())
}

/// Running `f64` sum of exposure-normalized frames.
#[derive(Default)]
struct Accumulator {
    sum: Option<Array2<f64>>,
    count: usize,
}

impl Accumulator {
    /// Add `frame` divided by its exposure time.
    fn add(mut self, frame: &Frame) -> Result<Self> {
        let exptime = frame
            .metadata
            .exposure_time
            .ok_or_else(|| CastorError::MissingKeyword {
                path: frame.metadata.path.clone().unwrap_or_default(),
                keyword: EXPOSURE_KEYWORD.into(),
            })?;
        match &mut self.sum {
            Some(sum) => {
                check_shape(sum.dim(), frame.data.dim())?;
                sum.zip_mut_with(&frame.data, |s, &v| *s += v as f64 / exptime);
            }
            None => self.sum = Some(frame.data.mapv(|v| v as f64 / exptime)),
        }
        self.count += 1;
        Ok(self)
    }

    fn merge(self, other: Self) -> Result<Self> {
        let sum = match (self.sum, other.sum) {
            (Some(mut a), Some(b)) => {
                check_shape(a.dim(), b.dim())?;
                a += &b;
                Some(a)
            }
            (a, b) => a.or(b),
        };
        Ok(Self {
            sum,
            count: self.count + other.count,
        })
    }

    fn mean(self) -> Option<Array2<f64>> {
        let n = self.count as f64;
        self.sum.map(|sum| sum / n)
    }
}

/// Build a master frame: the mean of all frames of `source`, each divided by
/// its own exposure time, stored at `precision`.
///
/// An empty source yields `default` (with a warning) when one is given, and
/// fails with [`CastorError::EmptyInput`] otherwise.
pub fn create_master(
    source: &FrameSource,
    default: Option<f64>,
    precision: Precision,
    reporter: &dyn ProgressReporter,
) -> Result<Reported<MasterFrame>> {
    let files = source.resolve()?;
    if files.is_empty() {
        return match default {
            Some(value) => {
                let warning = PipelineWarning::EmptyCalibration {
                    input: source.to_string(),
                    default: value,
                }
                .emit();
                Ok(Reported::with_warnings(
                    MasterFrame::Constant(value),
                    vec![warning],
                ))
            }
            None => Err(CastorError::EmptyInput {
                input: source.to_string(),
            }),
        };
    }

    reporter.begin_stage(PipelineStage::BuildingMaster, Some(files.len()));
    let master = average_files(&files, reporter)?;
    reporter.finish_stage();

    info!(
        source = %source,
        frames = files.len(),
        precision = %precision,
        "Master frame built"
    );
    Ok(Reported::clean(MasterFrame::from_f64(master, precision)))
}

fn average_files(files: &[PathBuf], reporter: &dyn ProgressReporter) -> Result<Array2<f64>> {
    let counter = AtomicUsize::new(0);
    let load = |path: &PathBuf| -> Result<Frame> {
        let frame = load_frame(path, false)?;
        debug!(path = %path.display(), "Accumulating calibration frame");
        let done = counter.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.advance(done);
        Ok(frame)
    };

    let total = if files.len() >= PARALLEL_FRAME_THRESHOLD {
        files
            .par_iter()
            .map(load)
            .try_fold(Accumulator::default, |acc, frame| acc.add(&frame?))
            .try_reduce(Accumulator::default, Accumulator::merge)?
    } else {
        files
            .iter()
            .map(load)
            .try_fold(Accumulator::default(), |acc, frame| acc.add(&frame?))?
    };

    total.mean().ok_or_else(|| CastorError::EmptyInput {
        input: "calibration frames".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_minus_frame() {
        let frame = MasterFrame::Single(Array2::from_elem((2, 2), 0.25));
        let diff = MasterFrame::Constant(1.0).subtract(&frame).unwrap();
        assert_eq!(diff, MasterFrame::Single(Array2::from_elem((2, 2), 0.75)));
    }

    #[test]
    fn test_normalized_frame_has_unit_mean() {
        let mut a = Array2::<f32>::zeros((2, 2));
        a[[0, 0]] = 2.0;
        a[[1, 1]] = 6.0;
        let norm = MasterFrame::Single(a).normalized().unwrap();
        assert!((norm.mean() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_flat_is_degenerate() {
        let zero = MasterFrame::Constant(0.0);
        assert!(matches!(zero.normalized(), Err(CastorError::DegenerateFlat)));
    }

    #[test]
    fn test_double_operand_widens_the_result() {
        let single = MasterFrame::Single(Array2::from_elem((1, 2), 1.0));
        let double = MasterFrame::Double(Array2::from_elem((1, 2), 0.1));
        let diff = single.subtract(&double).unwrap();
        assert_eq!(diff, MasterFrame::Double(Array2::from_elem((1, 2), 1.0 - 0.1)));
        assert_eq!(diff.precision(), Some(Precision::Double));
    }

    #[test]
    fn test_to_f64_shape_mismatch() {
        let frame = MasterFrame::Single(Array2::zeros((2, 3)));
        assert!(frame.to_f64((3, 2)).is_err());
        assert_eq!(
            MasterFrame::Constant(4.0).to_f64((1, 2)).unwrap(),
            Array2::from_elem((1, 2), 4.0)
        );
    }
}
