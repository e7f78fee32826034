//! Classifier training infrastructure.
//!
//! Tensor assembly and mini-batching, the early-stopping training loop, and
//! the classification metrics used to score trained models.

pub mod data;
pub mod metrics;
pub mod trainer;
