pub mod background;
pub mod components;
pub mod extract;
pub mod matching;

pub use background::Background;
pub use extract::{
    extract_sources, extract_sources_masked, source_coordinates, Source, SourceCatalog,
};
pub use matching::find_closest_sources;
