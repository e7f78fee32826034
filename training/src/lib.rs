//! Author attribution training pipeline.
//!
//! Selects the most active authors of a chat corpus, balances and shuffles
//! their messages reproducibly, fuses style metrics with token sequences, and
//! trains, evaluates and persists two-branch classifiers.

pub mod config;
pub mod pipeline;
pub mod progress;
pub mod training;
pub mod workflows;

pub use progress::{JsonlProgress, ProgressFanOut, TracingProgress};
pub use workflows::{FMeasure, FoldResult, KFoldReport, Orchestrator, Prediction, TrainReport};
