//! Feature extraction and the classifier model for authorid
//!
//! Each message is described by two views that the classifier fuses:
//!
//! - [`metrics`]: a fixed-width vector of hand-crafted style measurements
//! - [`tokenizer`]: a padded sequence of word ids
//!
//! [`classifier`] holds the candle network that consumes both views and the
//! single function that decides the output head from the class count.

pub mod classifier;
pub mod metrics;
pub mod tokenizer;

pub use classifier::{
    classifier_head_config, serialize_weights, Activation, AuthorClassifier, ClassifierDims,
    HeadConfig, LossKind,
};
pub use metrics::{MessageMetrics, METRICS_DIM};
pub use tokenizer::WordTokenizer;
