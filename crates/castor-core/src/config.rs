use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_ASTERISM_NEIGHBORS, DEFAULT_BACKGROUND_FILTER, DEFAULT_BACKGROUND_MESH,
    DEFAULT_INVARIANT_TOLERANCE, DEFAULT_MAX_CONTROL_POINTS, DEFAULT_MIN_AREA,
    DEFAULT_MIN_MATCHES, DEFAULT_PIXEL_TOLERANCE, DEFAULT_POINTING_SIGMA,
    DEFAULT_SOLVER_DETECTION_SIGMA, DEFAULT_THRESHOLD_SIGMA,
};
use crate::error::{CastorError, Result};

/// Settings threaded through every entry point of the reduction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CastorConfig {
    #[serde(default)]
    pub precision: Precision,
    /// Directory holding packaged resources (instrument tables, calibration files).
    #[serde(default = "default_resource_root")]
    pub resource_root: PathBuf,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub pointing: PointingConfig,
    /// Persist cubes computed by `open_or_compute`.
    #[serde(default = "default_true")]
    pub save: bool,
    /// Allow output files to be replaced.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub instrument: Option<InstrumentConfig>,
}

fn default_resource_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

impl Default for CastorConfig {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            resource_root: default_resource_root(),
            detection: DetectionConfig::default(),
            registration: RegistrationConfig::default(),
            pointing: PointingConfig::default(),
            save: true,
            overwrite: false,
            instrument: None,
        }
    }
}

impl CastorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CastorError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CastorError::Config(e.to_string()))
    }

    /// Path of a packaged resource.
    pub fn resource(&self, path: impl AsRef<Path>) -> PathBuf {
        self.resource_root.join(path)
    }
}

/// Floating-point precision of persisted data.
///
/// Cube samples are held as `f32` in memory and accumulated as `f64`. The
/// precision selects the storage of master frames and the on-disk sample type
/// of written cubes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    #[default]
    Single,
    Double,
}

impl Precision {
    /// FITS `BITPIX` used when persisting data at this precision.
    pub fn bitpix(self) -> i64 {
        match self {
            Self::Single => -32,
            Self::Double => -64,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "float32"),
            Self::Double => write!(f, "float64"),
        }
    }
}

/// Source extraction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detection threshold in multiples of the global background RMS.
    #[serde(default = "default_threshold_sigma")]
    pub threshold_sigma: f32,
    /// Background mesh cell size, in pixels.
    #[serde(default = "default_mesh_size")]
    pub mesh_size: usize,
    /// Median filter size over the background mesh, in cells.
    #[serde(default = "default_filter_size")]
    pub filter_size: usize,
    /// Minimum connected area of a source, in pixels.
    #[serde(default = "default_min_area")]
    pub min_area: usize,
}

fn default_threshold_sigma() -> f32 {
    DEFAULT_THRESHOLD_SIGMA
}
fn default_mesh_size() -> usize {
    DEFAULT_BACKGROUND_MESH
}
fn default_filter_size() -> usize {
    DEFAULT_BACKGROUND_FILTER
}
fn default_min_area() -> usize {
    DEFAULT_MIN_AREA
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_sigma: DEFAULT_THRESHOLD_SIGMA,
            mesh_size: DEFAULT_BACKGROUND_MESH,
            filter_size: DEFAULT_BACKGROUND_FILTER,
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl DetectionConfig {
    pub fn with_threshold(threshold_sigma: f32) -> Self {
        Self {
            threshold_sigma,
            ..Self::default()
        }
    }
}

/// What to do with the pixels of a frame whose transform could not be estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailedFramePolicy {
    /// Keep the unwarped pixels; the frame is flagged as failed.
    #[default]
    PassThrough,
    /// Replace every pixel of the frame by NaN.
    MarkInvalid,
}

impl fmt::Display for FailedFramePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough => write!(f, "Pass through"),
            Self::MarkInvalid => write!(f, "Mark invalid"),
        }
    }
}

/// Transform estimation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_max_control_points")]
    pub max_control_points: usize,
    /// Threshold of the solver's own source finder.
    #[serde(default = "default_solver_sigma")]
    pub detection_sigma: f32,
    #[serde(default = "default_min_area")]
    pub min_area: usize,
    #[serde(default = "default_pixel_tolerance")]
    pub pixel_tolerance: f64,
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
    #[serde(default = "default_asterism_neighbors")]
    pub asterism_neighbors: usize,
    #[serde(default = "default_invariant_tolerance")]
    pub invariant_tolerance: f64,
    #[serde(default)]
    pub failed_frame_policy: FailedFramePolicy,
}

fn default_max_control_points() -> usize {
    DEFAULT_MAX_CONTROL_POINTS
}
fn default_solver_sigma() -> f32 {
    DEFAULT_SOLVER_DETECTION_SIGMA
}
fn default_pixel_tolerance() -> f64 {
    DEFAULT_PIXEL_TOLERANCE
}
fn default_min_matches() -> usize {
    DEFAULT_MIN_MATCHES
}
fn default_asterism_neighbors() -> usize {
    DEFAULT_ASTERISM_NEIGHBORS
}
fn default_invariant_tolerance() -> f64 {
    DEFAULT_INVARIANT_TOLERANCE
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_control_points: DEFAULT_MAX_CONTROL_POINTS,
            detection_sigma: DEFAULT_SOLVER_DETECTION_SIGMA,
            min_area: DEFAULT_MIN_AREA,
            pixel_tolerance: DEFAULT_PIXEL_TOLERANCE,
            min_matches: DEFAULT_MIN_MATCHES,
            asterism_neighbors: DEFAULT_ASTERISM_NEIGHBORS,
            invariant_tolerance: DEFAULT_INVARIANT_TOLERANCE,
            failed_frame_policy: FailedFramePolicy::default(),
        }
    }
}

/// Pointing analysis settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointingConfig {
    /// Detection threshold of the sources matched across the sequence, in
    /// multiples of the background RMS. The other extraction settings come
    /// from [`DetectionConfig`].
    #[serde(default = "default_pointing_sigma")]
    pub threshold_sigma: f32,
}

fn default_pointing_sigma() -> f32 {
    DEFAULT_POINTING_SIGMA
}

impl Default for PointingConfig {
    fn default() -> Self {
        Self {
            threshold_sigma: DEFAULT_POINTING_SIGMA,
        }
    }
}

impl PointingConfig {
    /// Extraction settings of the pointing analysis, derived from `detection`.
    pub fn detection(&self, detection: &DetectionConfig) -> DetectionConfig {
        DetectionConfig {
            threshold_sigma: self.threshold_sigma,
            ..detection.clone()
        }
    }
}

/// Optical properties used to convert pixel offsets into angles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub focal_length_mm: f64,
    /// Unbinned pixel size (x, y), in micrometres.
    pub pixel_size_um: [f64; 2],
    #[serde(default = "default_binning")]
    pub binning: [u32; 2],
}

fn default_binning() -> [u32; 2] {
    [1, 1]
}

impl InstrumentConfig {
    /// Angular size of one (binned) pixel along x and y, in arcseconds.
    pub fn pixel_scale_arcsec(&self) -> [f64; 2] {
        let scale = |axis: usize| {
            let size_mm = self.pixel_size_um[axis] * 1e-3 * self.binning[axis] as f64;
            (size_mm / self.focal_length_mm).atan().to_degrees() * 3600.0
        };
        [scale(0), scale(1)]
    }
}
