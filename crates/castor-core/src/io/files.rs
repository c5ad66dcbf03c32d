use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CastorError, Result};
use crate::frame::{Frame, FrameMetadata, Timestamp};
use crate::pipeline::{PipelineStage, ProgressReporter};

use super::fits::FitsReader;

pub const EXPOSURE_KEYWORD: &str = "EXPTIME";
pub const TIMESTAMP_KEYWORD: &str = "DATE-OBS";

/// A set of single-exposure FITS frames.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameSource {
    /// Every `*.fit`/`*.fits` file of a directory. A missing directory is empty.
    Directory(PathBuf),
    /// An explicit list of files, used as given.
    Files(Vec<PathBuf>),
}

impl FrameSource {
    /// Resolve the source into a concrete list of files.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        match self {
            Self::Directory(dir) => list_fits(dir),
            Self::Files(files) => Ok(files.clone()),
        }
    }
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "{}", dir.display()),
            Self::Files(files) => write!(f, "list of {} files", files.len()),
        }
    }
}

impl From<PathBuf> for FrameSource {
    fn from(dir: PathBuf) -> Self {
        Self::Directory(dir)
    }
}

impl From<&Path> for FrameSource {
    fn from(dir: &Path) -> Self {
        Self::Directory(dir.to_path_buf())
    }
}

impl From<Vec<PathBuf>> for FrameSource {
    fn from(files: Vec<PathBuf>) -> Self {
        Self::Files(files)
    }
}

/// List the FITS files of a directory, sorted by path.
///
/// A directory that does not exist yields an empty list.
pub fn list_fits(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_fits = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(has_fits_extension);
        if is_fits {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_fits_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".fits", ".fit"]
        .iter()
        .any(|ext| lower.len() > ext.len() && lower.ends_with(ext))
}

/// Load the primary image of a FITS frame.
///
/// With `normalize`, samples are divided by the frame's `EXPTIME`.
pub fn load_frame(path: &Path, normalize: bool) -> Result<Frame> {
    let mut reader = FitsReader::open(path)?;
    let mut data = reader.read_image()?;

    let exposure_time = reader.read_key_f64(EXPOSURE_KEYWORD)?;
    if normalize {
        let exptime = exposure_time.ok_or_else(|| CastorError::MissingKeyword {
            path: path.to_path_buf(),
            keyword: EXPOSURE_KEYWORD.into(),
        })?;
        let factor = 1.0 / exptime;
        data.mapv_inplace(|v| (v as f64 * factor) as f32);
    }

    Ok(Frame {
        data,
        metadata: FrameMetadata {
            path: Some(path.to_path_buf()),
            exposure_time,
            timestamp: header_timestamp(&mut reader).ok(),
        },
    })
}

/// Parse the `DATE-OBS` keyword of the primary header.
pub fn header_timestamp(reader: &mut FitsReader) -> Result<Timestamp> {
    let text = reader
        .read_key_str(TIMESTAMP_KEYWORD)?
        .ok_or_else(|| CastorError::MissingKeyword {
            path: reader.path().to_path_buf(),
            keyword: TIMESTAMP_KEYWORD.into(),
        })?;
    Timestamp::parse(&text)
}

/// Read the acquisition timestamp of every file, touching headers only.
pub fn load_timestamps(
    files: &[PathBuf],
    reporter: &dyn ProgressReporter,
) -> Result<Vec<Timestamp>> {
    reporter.begin_stage(PipelineStage::LoadingHeaders, Some(files.len()));
    let mut timestamps = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        let mut reader = FitsReader::open(path)?;
        timestamps.push(header_timestamp(&mut reader)?);
        reporter.advance(i + 1);
    }
    reporter.finish_stage();
    Ok(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_extension_matching() {
        assert!(has_fits_extension("dark_001.fits"));
        assert!(has_fits_extension("DARK_001.FIT"));
        assert!(has_fits_extension("a.Fits"));
        assert!(!has_fits_extension(".fits"));
        assert!(!has_fits_extension("notes.txt"));
        assert!(!has_fits_extension("frame.fits.gz"));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let files = list_fits(Path::new("/nonexistent/castor/frames")).unwrap();
        assert!(files.is_empty());
    }
}
