//! Collaborator seams. The pipeline only ever talks to these traits.

pub mod extractor;
pub mod tracker;

pub use extractor::{Extractor, TextGenerator};
pub use tracker::TaskTracker;
