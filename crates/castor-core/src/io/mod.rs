pub mod cache;
pub mod files;
pub mod fits;

pub use cache::{compute_and_save, ensure_writable, load_cube, open_or_compute, save_cube};
pub use files::{list_fits, load_frame, load_timestamps, FrameSource};
pub use fits::{FitsHeader, FitsReader, HeaderValue, TableColumn};
