pub mod master;
pub mod reduction;

pub use master::{create_master, MasterFrame};
pub use reduction::{reduce, CalibrationSet, ReductionInputs};
