#[allow(dead_code)]
mod common;

use ndarray::Array2;
use tempfile::TempDir;

use castor_core::calibrate::{reduce, ReductionInputs};
use castor_core::config::Precision;
use castor_core::error::CastorError;
use castor_core::io::files::FrameSource;
use castor_core::pipeline::NoOpReporter;

struct Layout {
    _dir: TempDir,
    inputs: ReductionInputs,
}

/// Three science frames written in a different order than they were taken.
fn layout(with_flat: bool) -> Layout {
    let dir = TempDir::new().unwrap();
    let sci = dir.path().join("sci");
    let dark = dir.path().join("dark");
    let flat = dir.path().join("flat");
    for d in [&sci, &dark, &flat] {
        std::fs::create_dir(d).unwrap();
    }

    let frames = [
        ("a.fits", 30.0, "2019-08-08T21:00:30"),
        ("b.fits", 10.0, "2019-08-08T21:00:10"),
        ("c.fits", 20.0, "2019-08-08T21:00:20"),
    ];
    for (name, value, date) in frames {
        common::write_frame(&sci.join(name), &Array2::from_elem((2, 2), value), 1.0, date);
    }
    common::write_frame(
        &dark.join("d.fits"),
        &Array2::from_elem((2, 2), 2.0),
        1.0,
        "2019-08-08T20:00:00",
    );
    if with_flat {
        let flat_data = Array2::from_shape_vec((2, 2), vec![2.0f32, 4.0, 2.0, 4.0]).unwrap();
        common::write_frame(&flat.join("f.fits"), &flat_data, 1.0, "2019-08-08T19:00:00");
    }

    let inputs = ReductionInputs {
        science: FrameSource::from(sci),
        science_dark: FrameSource::from(dark),
        flat: FrameSource::from(flat),
        flat_dark: FrameSource::from(dir.path().join("flat_dark")),
    };
    Layout { _dir: dir, inputs }
}

#[test]
fn test_frames_sorted_by_timestamp() {
    let layout = layout(true);
    let cube = reduce(&layout.inputs, Precision::Single, &NoOpReporter).unwrap().value;

    assert_eq!(cube.len(), 3);
    let stamps = cube.timestamps();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(stamps[0].to_string(), "2019-08-08T21:00:10.000000");
    // Frames follow their timestamps: raw values 10, 20, 30.
    let first: Vec<f32> = (0..3).map(|i| cube.frame(i)[[0, 0]]).collect();
    assert!(first[0] < first[1] && first[1] < first[2], "{first:?}");
}

#[test]
fn test_calibrated_values_match_hand_computation() {
    let layout = layout(true);
    let reported = reduce(&layout.inputs, Precision::Single, &NoOpReporter).unwrap();
    // Only the flat dark is missing.
    assert_eq!(reported.warnings.len(), 1);

    let cube = reported.value;
    // Flat mean is 3: normalized flat is [2/3, 4/3] per row.
    let expected_first = (10.0 - 2.0) / (2.0 / 3.0);
    let expected_second = (10.0 - 2.0) / (4.0 / 3.0);
    let frame = cube.frame(0);
    assert!((frame[[0, 0]] - expected_first).abs() < 1e-4);
    assert!((frame[[0, 1]] - expected_second).abs() < 1e-4);
    assert!((frame[[1, 0]] - expected_first).abs() < 1e-4);
}

#[test]
fn test_double_precision_masters() {
    let layout = layout(true);
    let single = reduce(&layout.inputs, Precision::Single, &NoOpReporter).unwrap();
    let double = reduce(&layout.inputs, Precision::Double, &NoOpReporter).unwrap();

    assert_eq!(double.warnings.len(), single.warnings.len());
    assert_eq!(double.value.timestamps(), single.value.timestamps());
    for (a, b) in double.value.data().iter().zip(single.value.data().iter()) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }
}

#[test]
fn test_missing_flat_defaults_to_one() {
    let layout = layout(false);
    let reported = reduce(&layout.inputs, Precision::Single, &NoOpReporter).unwrap();
    assert_eq!(reported.warnings.len(), 2);
    let frame = reported.value.frame(2).to_owned();
    assert!(frame.iter().all(|&v| (v - 28.0).abs() < 1e-5));
}

#[test]
fn test_empty_science_set_fails() {
    let layout = layout(true);
    let inputs = ReductionInputs {
        science: FrameSource::Files(Vec::new()),
        ..layout.inputs.clone()
    };
    let err = reduce(&inputs, Precision::Single, &NoOpReporter).unwrap_err();
    assert!(matches!(err, CastorError::EmptyInput { .. }));
}
