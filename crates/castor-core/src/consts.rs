/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Default source detection threshold, in multiples of the background RMS.
pub const DEFAULT_THRESHOLD_SIGMA: f32 = 3.0;

/// Detection threshold of the pointing analysis, which only needs bright stars.
pub const DEFAULT_POINTING_SIGMA: f32 = 20.0;

/// Default size (in pixels) of a background estimation mesh cell.
pub const DEFAULT_BACKGROUND_MESH: usize = 64;

/// Default size (in mesh cells) of the median filter applied to the background mesh.
pub const DEFAULT_BACKGROUND_FILTER: usize = 3;

/// Minimum number of connected pixels for a detection to become a source.
pub const DEFAULT_MIN_AREA: usize = 5;

/// Sigma used for the iterative clipping of background mesh statistics.
pub const BACKGROUND_CLIP_SIGMA: f64 = 3.0;

/// Maximum number of clipping iterations per background mesh cell.
pub const BACKGROUND_CLIP_ITERATIONS: usize = 10;

/// Number of brightest sources used as control points by the transform solver.
pub const DEFAULT_MAX_CONTROL_POINTS: usize = 50;

/// Detection threshold used by the transform solver's own source finder.
pub const DEFAULT_SOLVER_DETECTION_SIGMA: f32 = 5.0;

/// Maximum residual (pixels) for a transformed source to count as a match.
pub const DEFAULT_PIXEL_TOLERANCE: f64 = 2.0;

/// Number of matched sources that accepts a transform hypothesis.
pub const DEFAULT_MIN_MATCHES: usize = 10;

/// Number of nearest neighbours used to build triangles around each control point.
pub const DEFAULT_ASTERISM_NEIGHBORS: usize = 5;

/// Maximum difference of each triangle side ratio for two triangles to pair.
pub const DEFAULT_INVARIANT_TOLERANCE: f64 = 0.03;

/// Sub-pixel resolution of the affine warp (bilinear weights are quantized to 1/32 px).
pub const WARP_SUBPIXEL_STEPS: f64 = 32.0;

/// Width of the `DATE-OBS` column of persisted cubes (FITS `29A`).
pub const TIMESTAMP_COLUMN_WIDTH: usize = 29;

/// Width of the `STATUS` column of aligned cubes.
pub const STATUS_COLUMN_WIDTH: usize = 9;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;
