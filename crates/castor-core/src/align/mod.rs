pub mod pointing;
pub mod register;
pub mod solver;
pub mod transform;
pub mod warp;

pub use pointing::{measure_pointing, PointingSample};
pub use register::{
    reference_sources, register_stars, FrameStatus, ReferenceSources, RegisteredCube,
};
pub use solver::{fit_similarity, AsterismSolver, TransformSolver};
pub use transform::AffineTransform;
pub use warp::affine_warp;
