pub mod align;
pub mod calibrate;
pub mod config;
pub mod consts;
pub mod detection;
pub mod error;
pub mod frame;
pub mod io;
pub mod pipeline;
pub mod stats;
