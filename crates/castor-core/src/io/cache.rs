//! Persisted cubes: atomic writes, overwrite protection and the
//! open-or-compute cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use tempfile::Builder;
use tracing::{debug, info};

use crate::config::Precision;
use crate::consts::TIMESTAMP_COLUMN_WIDTH;
use crate::error::{CastorError, PipelineWarning, Reported, Result};
use crate::frame::{ImageCube, Timestamp};

use super::fits::{write_cube, FitsReader, TableColumn, TIMESTAMP_COLUMN};

/// Fail with [`CastorError::OutputConflict`] if any of `paths` exists and
/// `overwrite` is false.
pub fn ensure_writable<P: AsRef<Path>>(paths: &[P], overwrite: bool) -> Result<()> {
    if overwrite {
        return Ok(());
    }
    for path in paths {
        let path: &Path = path.as_ref();
        if path.exists() {
            return Err(CastorError::OutputConflict {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// `DATE-OBS` column of a persisted cube.
pub(crate) fn timestamp_column(timestamps: &[Timestamp]) -> TableColumn {
    let values = timestamps.iter().map(|t| t.to_string()).collect();
    TableColumn::text(TIMESTAMP_COLUMN, TIMESTAMP_COLUMN_WIDTH, values)
}

/// Parse the `DATE-OBS` column of an open cube.
pub(crate) fn read_timestamps(reader: &mut FitsReader) -> Result<Vec<Timestamp>> {
    let column = reader
        .read_timestamp_column()?
        .ok_or_else(|| CastorError::MissingKeyword {
            path: reader.path().to_path_buf(),
            keyword: TIMESTAMP_COLUMN.into(),
        })?;
    column.iter().map(|text| Timestamp::parse(text)).collect()
}

/// Read a cube and its `DATE-OBS` column.
pub fn load_cube(path: &Path) -> Result<ImageCube> {
    let mut reader = FitsReader::open(path)?;
    let data = reader.read_cube()?;
    let timestamps = read_timestamps(&mut reader)?;
    ImageCube::new(data, timestamps)
}

/// Write a cube and its per-frame columns under a temporary name next to
/// `path`, then rename it into place.
///
/// `path` never holds a partial file: a failure at any point removes the
/// temporary file. Without `overwrite`, an existing file (including one
/// created while writing) is never replaced.
pub(crate) fn write_atomic(
    path: &Path,
    data: &Array3<f32>,
    columns: &[TableColumn],
    overwrite: bool,
    precision: Precision,
) -> Result<()> {
    let tmp = Builder::new()
        .prefix(".castor")
        .suffix(".fits")
        .tempfile_in(parent_dir(path))?
        .into_temp_path();
    write_cube(&tmp, data, columns, precision)?;
    std::fs::File::open(&tmp)?.sync_all()?;

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| match e.error.kind() {
        ErrorKind::AlreadyExists => CastorError::OutputConflict {
            path: path.to_path_buf(),
        },
        _ => CastorError::Persistence {
            path: path.to_path_buf(),
            message: e.error.to_string(),
        },
    })?;

    info!(
        path = %path.display(),
        frames = data.dim().0,
        precision = %precision,
        "Cube saved"
    );
    Ok(())
}

/// Write a cube and its timestamps atomically.
pub fn save_cube(
    path: &Path,
    cube: &ImageCube,
    overwrite: bool,
    precision: Precision,
) -> Result<()> {
    ensure_writable(&[path], overwrite)?;
    let columns = [timestamp_column(cube.timestamps())];
    write_atomic(path, cube.data(), &columns, overwrite, precision)
}

/// Refuse to clobber `path`, compute the cube, then save it.
pub fn compute_and_save<F>(
    path: &Path,
    compute: F,
    overwrite: bool,
    precision: Precision,
) -> Result<ImageCube>
where
    F: FnOnce() -> Result<ImageCube>,
{
    ensure_writable(&[path], overwrite)?;
    let cube = compute()?;
    save_cube(path, &cube, overwrite, precision)?;
    Ok(cube)
}

/// Load the cube at `path` if it exists, otherwise compute it and, when
/// `save` is set, persist it.
///
/// An existing file is returned as-is. A failed save does not fail the call:
/// no file is left behind, a [`PipelineWarning::PersistenceFailed`] is
/// reported and the computed cube is still returned.
pub fn open_or_compute<F>(
    path: &Path,
    compute: F,
    save: bool,
    precision: Precision,
) -> Result<Reported<ImageCube>>
where
    F: FnOnce() -> Result<ImageCube>,
{
    if path.exists() {
        debug!(path = %path.display(), "Loading cached cube");
        return load_cube(path).map(Reported::clean);
    }

    let cube = compute()?;
    if !save {
        return Ok(Reported::clean(cube));
    }

    let columns = [timestamp_column(cube.timestamps())];
    match write_atomic(path, cube.data(), &columns, false, precision) {
        Ok(()) => Ok(Reported::clean(cube)),
        Err(err) => {
            let warning = PipelineWarning::PersistenceFailed {
                path: path.to_path_buf(),
                kind: err.kind().to_string(),
                message: err.to_string(),
            }
            .emit();
            Ok(Reported::with_warnings(cube, vec![warning]))
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::Array3;

    fn cube() -> ImageCube {
        let data = Array3::from_shape_fn((2, 3, 4), |(n, r, c)| (n * 100 + r * 10 + c) as f32);
        let day = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let stamps = vec![
            Timestamp(day.and_hms_micro_opt(22, 0, 0, 250_000).unwrap()),
            Timestamp(day.and_hms_micro_opt(22, 0, 30, 0).unwrap()),
        ];
        ImageCube::new(data, stamps).unwrap()
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("cube.fits")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("out/cube.fits")), PathBuf::from("out"));
    }

    #[test]
    fn test_noclobber_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        std::fs::write(&path, b"existing").unwrap();

        let err = save_cube(&path, &cube(), false, Precision::Single).unwrap_err();
        assert!(matches!(err, CastorError::OutputConflict { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        std::fs::write(&path, b"existing").unwrap();

        save_cube(&path, &cube(), true, Precision::Double).unwrap();
        let loaded = load_cube(&path).unwrap();
        assert_eq!(loaded, cube());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
