//! Person search dataset and sample types.

mod dataset;
mod image;
mod person_search;
mod sample;

pub use self::image::*;
pub use dataset::*;
pub use person_search::*;
pub use sample::*;
