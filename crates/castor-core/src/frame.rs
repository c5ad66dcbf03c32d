use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::error::{CastorError, Result};

/// Canonical textual form of a timestamp, short enough for a FITS `29A` column.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const ACCEPTED_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Acquisition time of a frame (`DATE-OBS`), without time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub NaiveDateTime);

impl Timestamp {
    /// Parse an ISO-8601 date-time as written by acquisition software.
    ///
    /// Accepts a `T` or space separator, an optional fractional second and an
    /// optional trailing `Z`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim().trim_end_matches('Z');
        ACCEPTED_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(Timestamp)
            .ok_or_else(|| CastorError::InvalidTimestamp(text.to_string()))
    }

    /// Hours elapsed since `origin` (negative if `self` is earlier).
    pub fn hours_since(&self, origin: &Timestamp) -> f64 {
        let delta = self.0 - origin.0;
        match delta.num_microseconds() {
            Some(us) => us as f64 / 3.6e9,
            None => delta.num_milliseconds() as f64 / 3.6e6,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// A single image frame. Invalid pixels are NaN.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    pub metadata: FrameMetadata,
}

impl Frame {
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    /// File the frame was read from.
    pub path: Option<PathBuf>,
    /// `EXPTIME` header value, in seconds.
    pub exposure_time: Option<f64>,
    /// `DATE-OBS` header value.
    pub timestamp: Option<Timestamp>,
}

/// A time-ordered stack of equally-shaped frames, shape = (frames, height, width).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageCube {
    data: Array3<f32>,
    timestamps: Vec<Timestamp>,
}

impl ImageCube {
    /// Build a cube, checking that there is exactly one timestamp per frame.
    pub fn new(data: Array3<f32>, timestamps: Vec<Timestamp>) -> Result<Self> {
        let n = data.len_of(Axis(0));
        if n != timestamps.len() {
            return Err(CastorError::LengthMismatch {
                frames: n,
                timestamps: timestamps.len(),
            });
        }
        Ok(Self { data, timestamps })
    }

    /// Stack 2-D frames into a cube. All frames must share the first frame's shape.
    pub fn from_frames(frames: &[Array2<f32>], timestamps: Vec<Timestamp>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(CastorError::EmptyInput {
                input: "frame list".into(),
            });
        };
        let (h, w) = first.dim();
        let mut data = Array3::<f32>::zeros((frames.len(), h, w));
        for (i, frame) in frames.iter().enumerate() {
            if frame.dim() != (h, w) {
                return Err(CastorError::ShapeMismatch {
                    expected: (h, w),
                    found: frame.dim(),
                });
            }
            data.index_axis_mut(Axis(0), i).assign(frame);
        }
        Self::new(data, timestamps)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// (height, width) of every frame.
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.data.dim();
        (h, w)
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn into_parts(self) -> (Array3<f32>, Vec<Timestamp>) {
        (self.data, self.timestamps)
    }
}

/// Pixel coordinates, 0-based, `x` along columns and `y` along rows.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}
