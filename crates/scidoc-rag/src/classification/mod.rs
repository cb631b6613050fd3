//! Content-type classification of text spans

mod classifier;
pub mod detectors;

pub use classifier::{classification_summary, ClassificationHints, ClassificationSummary, ContentClassifier};
pub use detectors::{Detector, DETECTORS};
