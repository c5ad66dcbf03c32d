#[allow(dead_code)]
mod common;

use approx::assert_relative_eq;
use ndarray::Array2;

use castor_core::align::{measure_pointing, AffineTransform, AsterismSolver, TransformSolver};
use castor_core::config::{CastorConfig, InstrumentConfig};
use castor_core::consts::DEFAULT_POINTING_SIGMA;
use castor_core::error::{GeometrySolverError, PipelineWarning};
use castor_core::frame::{ImageCube, Point};

fn drifting_cube() -> ImageCube {
    let stars = common::star_list();
    let frames = vec![
        common::render_field(&stars, 1),
        common::render_field(&common::shifted(&stars, 2.0, -1.0), 2),
        common::blank_field(3),
    ];
    let stamps = vec![
        common::timestamp(20, 0, 0),
        common::timestamp(21, 0, 0),
        common::timestamp(21, 30, 0),
    ];
    ImageCube::from_frames(&frames, stamps).unwrap()
}

fn config() -> CastorConfig {
    CastorConfig {
        instrument: Some(InstrumentConfig {
            focal_length_mm: 1000.0,
            pixel_size_um: [5.0, 5.0],
            binning: [2, 2],
        }),
        ..CastorConfig::default()
    }
}

#[test]
fn test_drift_is_measured() {
    let config = config();
    let solver = AsterismSolver::new(config.registration.clone());
    let reported = measure_pointing(&drifting_cube(), &config, &solver).unwrap();
    let samples = reported.value;
    assert_eq!(samples.len(), 3);

    let first = &samples[0];
    assert_eq!(first.elapsed_hours, 0.0);
    assert_relative_eq!(first.scale, 1.0, epsilon = 1e-9);
    assert!(first.rotation_deg.abs() < 1e-6);

    let second = &samples[1];
    assert_relative_eq!(second.elapsed_hours, 1.0, epsilon = 1e-12);
    assert!((second.translation_px.0 + 2.0).abs() < 0.1);
    assert!((second.translation_px.1 - 1.0).abs() < 0.1);
    let (ax, ay) = second.translation_arcsec.unwrap();
    let scale = config.instrument.as_ref().unwrap().pixel_scale_arcsec()[0];
    assert_relative_eq!(ax, second.translation_px.0 * scale, epsilon = 1e-9);
    assert_relative_eq!(ay, second.translation_px.1 * scale, epsilon = 1e-9);
}

#[test]
fn test_failed_frame_is_nan() {
    let config = config();
    let solver = AsterismSolver::new(config.registration.clone());
    let reported = measure_pointing(&drifting_cube(), &config, &solver).unwrap();

    assert_eq!(reported.warnings.len(), 1);
    assert!(matches!(
        reported.warnings[0],
        PipelineWarning::RegistrationFailed { frame: 2, .. }
    ));
    let third = &reported.value[2];
    assert!(!third.is_valid());
    assert!(third.scale.is_nan());
    assert!(third.translation_px.0.is_nan());
    assert_relative_eq!(third.elapsed_hours, 1.5, epsilon = 1e-12);
}

#[test]
fn test_no_instrument_means_no_arcseconds() {
    let config = CastorConfig {
        instrument: None,
        ..config()
    };
    let solver = AsterismSolver::new(config.registration.clone());
    let samples = measure_pointing(&drifting_cube(), &config, &solver)
        .unwrap()
        .value;
    assert!(samples.iter().all(|s| s.translation_arcsec.is_none()));
}

#[test]
fn test_default_pointing_threshold() {
    let config = CastorConfig::default();
    assert_eq!(config.pointing.threshold_sigma, DEFAULT_POINTING_SIGMA);
    assert_eq!(DEFAULT_POINTING_SIGMA, 20.0);

    let detection = config.pointing.detection(&config.detection);
    assert_eq!(detection.threshold_sigma, 20.0);
    assert_eq!(detection.mesh_size, config.detection.mesh_size);
    assert_eq!(detection.min_area, config.detection.min_area);

    let parsed = CastorConfig::from_toml_str("[pointing]\nthreshold_sigma = 8.0\n").unwrap();
    assert_eq!(parsed.pointing.threshold_sigma, 8.0);
}

/// Solver whose estimate has an infinite translation.
struct DivergingSolver;

impl TransformSolver for DivergingSolver {
    fn find_sources(&self, _image: &Array2<f32>) -> Vec<Point> {
        Vec::new()
    }

    fn estimate(
        &self,
        _sources: &[Point],
        _reference: &[Point],
    ) -> Result<AffineTransform, GeometrySolverError> {
        Ok(AffineTransform::from_matrix([
            [1.0, 0.0, f64::INFINITY],
            [0.0, 1.0, 0.0],
        ]))
    }
}

#[test]
fn test_non_finite_estimate_is_a_failure() {
    let reported = measure_pointing(&drifting_cube(), &config(), &DivergingSolver).unwrap();

    assert_eq!(reported.warnings.len(), 3);
    for (i, warning) in reported.warnings.iter().enumerate() {
        match warning {
            PipelineWarning::RegistrationFailed { frame, message } => {
                assert_eq!(*frame, i);
                assert_eq!(*message, GeometrySolverError::NonFinite.to_string());
            }
            other => panic!("unexpected warning {other:?}"),
        }
    }
    assert!(reported.value.iter().all(|s| !s.is_valid()));
    assert!(reported.value[1].translation_px.0.is_nan());
}
