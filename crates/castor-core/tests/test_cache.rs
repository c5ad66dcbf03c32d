#[allow(dead_code)]
mod common;

use std::cell::Cell;

use ndarray::Array3;
use tempfile::TempDir;

use castor_core::config::Precision;
use castor_core::error::{CastorError, PipelineWarning};
use castor_core::frame::ImageCube;
use castor_core::io::cache::{compute_and_save, ensure_writable, open_or_compute};

fn sample_cube() -> ImageCube {
    let data =
        Array3::from_shape_fn((3, 4, 5), |(n, r, c)| n as f32 * 0.5 + r as f32 - c as f32);
    let stamps = vec![
        common::timestamp(21, 0, 0),
        common::timestamp(21, 0, 10),
        common::timestamp(21, 0, 20),
    ];
    ImageCube::new(data, stamps).unwrap()
}

#[test]
fn test_compute_then_reuse() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.fits");
    let calls = Cell::new(0);

    let first = open_or_compute(
        &path,
        || {
            calls.set(calls.get() + 1);
            Ok(sample_cube())
        },
        true,
        Precision::Single,
    )
    .unwrap();
    assert!(first.warnings.is_empty());
    assert!(path.exists());
    assert_eq!(calls.get(), 1);

    let second = open_or_compute(
        &path,
        || {
            calls.set(calls.get() + 1);
            Ok(sample_cube())
        },
        true,
        Precision::Single,
    )
    .unwrap();
    assert_eq!(calls.get(), 1, "cached cube must not be recomputed");
    assert_eq!(second.value, first.value);
    assert_eq!(second.value.timestamps(), sample_cube().timestamps());
}

#[test]
fn test_no_save_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.fits");
    let cube = open_or_compute(&path, || Ok(sample_cube()), false, Precision::Single).unwrap();
    assert_eq!(cube.value, sample_cube());
    assert!(!path.exists());
}

#[test]
fn test_save_failure_still_returns_result() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing_dir").join("cube.fits");

    let reported = open_or_compute(&path, || Ok(sample_cube()), true, Precision::Single).unwrap();
    assert_eq!(reported.value, sample_cube());
    assert_eq!(reported.warnings.len(), 1);
    assert!(matches!(
        reported.warnings[0],
        PipelineWarning::PersistenceFailed { .. }
    ));
    assert!(reported.warnings[0].to_string().contains("occurred while saving"));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_failed_rename_after_writing_leaves_no_partial_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.fits");

    // Another writer claims the path while the cube is being computed.
    let reported = open_or_compute(
        &path,
        || {
            std::fs::write(&path, b"other writer").unwrap();
            Ok(sample_cube())
        },
        true,
        Precision::Single,
    )
    .unwrap();

    assert_eq!(reported.value, sample_cube());
    assert_eq!(reported.warnings.len(), 1);
    assert!(matches!(
        reported.warnings[0],
        PipelineWarning::PersistenceFailed { ref kind, .. } if kind == "OutputConflictError"
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert_eq!(std::fs::read(&path).unwrap(), b"other writer");
}

#[test]
fn test_compute_errors_propagate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.fits");
    let err = open_or_compute(
        &path,
        || Err(CastorError::EmptyInput { input: "sci".into() }),
        true,
        Precision::Single,
    )
    .unwrap_err();
    assert!(matches!(err, CastorError::EmptyInput { .. }));
    assert!(!path.exists());
}

#[test]
fn test_existing_output_fails_before_computing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aligned.fits");
    std::fs::write(&path, b"previous run").unwrap();
    assert!(ensure_writable(&[&path], true).is_ok());

    let calls = Cell::new(0);
    let err = compute_and_save(
        &path,
        || {
            calls.set(calls.get() + 1);
            Ok(sample_cube())
        },
        false,
        Precision::Single,
    )
    .unwrap_err();
    assert!(matches!(err, CastorError::OutputConflict { .. }));
    assert_eq!(calls.get(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), b"previous run");
}

#[test]
fn test_compute_and_save_overwrites_when_allowed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aligned.fits");
    std::fs::write(&path, b"previous run").unwrap();

    let cube = compute_and_save(&path, || Ok(sample_cube()), true, Precision::Double).unwrap();
    let reloaded = open_or_compute(&path, || unreachable!(), true, Precision::Single).unwrap();
    assert_eq!(reloaded.value, cube);
}
