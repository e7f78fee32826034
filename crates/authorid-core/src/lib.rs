//! Core types, traits, and errors for authorid
//!
//! This crate contains the types shared by every authorid component: message
//! records, the ordered active author set, tokenizer state, the persisted
//! artifact bundle, configuration, and the interfaces of the collaborators the
//! training pipeline consumes (corpus provider, artifact store, progress sink).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

// ---------------------------------------------------------------------------
// Corpus types
// ---------------------------------------------------------------------------

/// A single chat message as read from the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Author identity (the classification label).
    #[serde(alias = "label")]
    pub author: String,
    /// Raw message text.
    #[serde(alias = "message")]
    pub text: String,
    /// Time the message was sent, when the export carries it.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Create a record without a timestamp.
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            timestamp: None,
        }
    }
}

/// Ordered set of the authors a model classifies between.
///
/// The position of an author in this list is its class index, both when
/// training and when predicting. The ordering is persisted with every model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveAuthors(Vec<String>);

impl ActiveAuthors {
    /// Wrap an ordered author list.
    pub fn new(authors: Vec<String>) -> Self {
        Self(authors)
    }

    /// Class index of `author`, if it is active.
    pub fn index_of(&self, author: &str) -> Option<usize> {
        self.0.iter().position(|a| a == author)
    }

    /// Author at class index `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Whether `author` is one of the active authors.
    pub fn contains(&self, author: &str) -> bool {
        self.index_of(author).is_some()
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no active authors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate authors in class index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Borrow the underlying slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for ActiveAuthors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Artifact types
// ---------------------------------------------------------------------------

/// Identifier under which a trained artifact is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Parse an identifier, rejecting values that cannot name a directory.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty()
            || value.starts_with('.')
            || value.contains(['/', '\\'])
            || value.chars().any(char::is_whitespace)
        {
            return Err(AuthorIdError::Config(format!(
                "invalid run identifier: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    /// Identifier of a single training run started at `at` (unix seconds).
    pub fn for_training(at: DateTime<Utc>) -> Self {
        Self(at.timestamp().to_string())
    }

    /// Identifier of one k-fold evaluation fold.
    ///
    /// Unique per fold of a run, and carries the fold accuracy and the
    /// configuration for readability.
    pub fn for_fold(
        started: DateTime<Utc>,
        fold: usize,
        accuracy: f64,
        amount: usize,
        quotient: f64,
    ) -> Self {
        Self(format!(
            "{}-fold{}-{:.3}-{}-{}",
            started.timestamp(),
            fold,
            accuracy,
            amount,
            quotient
        ))
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = AuthorIdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Fitted word tokenizer state.
///
/// `vocabulary[i]` has token id `i + 1`; id `0` is padding. `max_len` is the
/// sequence length every message is padded or truncated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerState {
    /// Words ordered by descending corpus frequency.
    pub vocabulary: Vec<String>,
    /// Fixed token sequence length.
    pub max_len: usize,
}

/// The fully shuffled, balanced corpus a model was trained on.
///
/// Labels are class indices into the artifact's [`ActiveAuthors`]. The rows
/// named by [`ArtifactManifest::held_out`] were the validation slice, every
/// other row was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldOutSamples {
    /// Messages in final (shuffled) order.
    pub messages: Vec<String>,
    /// Class index of each message.
    pub labels: Vec<u32>,
}

/// Output layer shape and loss, chosen from the class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    /// One sigmoid unit, binary cross-entropy.
    Binary,
    /// One softmax unit per class, sparse categorical cross-entropy.
    MultiClass,
}

/// Metadata describing a persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Identifier of the run that produced every component.
    pub run_id: RunId,
    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
    /// Number of active authors requested.
    pub amount: usize,
    /// Train/test quotient used for the split.
    pub quotient: f64,
    /// Rows of the persisted samples that were held out for validation.
    pub held_out: Range<usize>,
    /// Seed of the shuffling generator.
    pub seed: u64,
    /// Head used by the classifier.
    pub head: HeadKind,
    /// Width of the metrics vector the model expects.
    pub metrics_dim: usize,
    /// Layer settings the weights were trained with.
    pub model: ModelConfig,
    /// Validation accuracy of the persisted weights.
    pub accuracy: f64,
    /// Validation loss of the persisted weights.
    pub loss: f64,
    /// Hex SHA-256 digest of each component file, keyed by file name.
    ///
    /// Filled in by the artifact store when it writes the bundle.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
}

/// Everything needed to reload and use a trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    /// Run metadata and component digests.
    pub manifest: ArtifactManifest,
    /// Class index ordering.
    pub actives: ActiveAuthors,
    /// Vocabulary and padded length.
    pub tokenizer: TokenizerState,
    /// Model weights in safetensors format.
    pub weights: Vec<u8>,
    /// Shuffled corpus with its label indices.
    pub samples: HeldOutSamples,
}

/// Result of evaluating a persisted model on its held-out slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Artifact that was evaluated.
    pub run_id: RunId,
    /// F1 score per active author, in class index order.
    pub per_class_f1: Vec<f64>,
    /// Unweighted mean of `per_class_f1`.
    pub mean_f1: f64,
    /// Accuracy on the held-out slice.
    pub accuracy: f64,
    /// Number of held-out samples evaluated.
    pub samples: usize,
    /// When the evaluation ran.
    pub evaluated_at: DateTime<Utc>,
}

/// Summary row returned by [`ArtifactStore::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact identifier.
    pub run_id: RunId,
    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
    /// Validation accuracy recorded at training time.
    pub accuracy: f64,
    /// Number of active authors.
    pub amount: usize,
}

/// Per-epoch training progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// One-based epoch number.
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub train_loss: f64,
    /// Validation loss after the epoch.
    pub val_loss: f64,
    /// Validation accuracy after the epoch.
    pub val_accuracy: f64,
    /// Whether this epoch improved the best validation loss.
    pub improved: bool,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthorIdConfig {
    /// Where messages are read from.
    #[serde(default)]
    pub corpus: CorpusConfig,
    /// Where artifacts are written.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Data selection and optimisation settings.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Classifier layer settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuthorIdConfig {
    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.model.validate()
    }
}

/// Corpus location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// JSON or JSON-lines message export.
    #[serde(default = "default_corpus_path")]
    pub path: String,
}

fn default_corpus_path() -> String {
    "data/messages.json".to_string()
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

/// Artifact storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per artifact.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    /// Optional JSON-lines file receiving per-epoch progress.
    #[serde(default)]
    pub progress_path: Option<String>,
}

fn default_artifacts_dir() -> String {
    "models".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            progress_path: None,
        }
    }
}

/// Data selection and optimiser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of most active authors to classify between.
    #[serde(default = "default_amount")]
    pub amount: usize,
    /// Share of the balanced corpus used for training.
    #[serde(default = "default_quotient")]
    pub quotient: f64,
    /// Seed of the shuffling generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Adam learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Mini-batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Epoch budget of a single training run.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Epoch budget of each k-fold model.
    #[serde(default = "default_kfold_max_epochs")]
    pub kfold_max_epochs: usize,
    /// Epochs without validation loss improvement before stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
}

fn default_amount() -> usize {
    5
}

fn default_quotient() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_batch_size() -> usize {
    64
}

fn default_max_epochs() -> usize {
    100
}

fn default_kfold_max_epochs() -> usize {
    50
}

fn default_patience() -> usize {
    10
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            amount: default_amount(),
            quotient: default_quotient(),
            seed: default_seed(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            max_epochs: default_max_epochs(),
            kfold_max_epochs: default_kfold_max_epochs(),
            patience: default_patience(),
        }
    }
}

impl TrainingConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.amount < 2 {
            return Err(AuthorIdError::Config(format!(
                "amount must be at least 2, got {}",
                self.amount
            )));
        }
        if !(self.quotient > 0.0 && self.quotient < 1.0) {
            return Err(AuthorIdError::Config(format!(
                "quotient must be in (0, 1), got {}",
                self.quotient
            )));
        }
        if self.batch_size == 0 {
            return Err(AuthorIdError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_epochs == 0 || self.kfold_max_epochs == 0 {
            return Err(AuthorIdError::Config("epoch budgets must be > 0".to_string()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(AuthorIdError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Classifier layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dropout rate applied between layers during training.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Width of the hidden layers in the metrics branch.
    #[serde(default = "default_branch_width")]
    pub metrics_width: usize,
    /// Width of the token branch input projection and output.
    #[serde(default = "default_branch_width")]
    pub token_width: usize,
    /// Widths of the two layers inside each token branch block.
    #[serde(default = "default_block_widths")]
    pub block_widths: (usize, usize),
    /// Number of repeated blocks in the token branch.
    #[serde(default = "default_token_blocks")]
    pub token_blocks: usize,
    /// Width of the layer after the branches are concatenated.
    #[serde(default = "default_fusion_width")]
    pub fusion_width: usize,
}

fn default_dropout() -> f32 {
    0.1
}

fn default_branch_width() -> usize {
    50
}

fn default_block_widths() -> (usize, usize) {
    (300, 200)
}

fn default_token_blocks() -> usize {
    1
}

fn default_fusion_width() -> usize {
    25
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dropout: default_dropout(),
            metrics_width: default_branch_width(),
            token_width: default_branch_width(),
            block_widths: default_block_widths(),
            token_blocks: default_token_blocks(),
            fusion_width: default_fusion_width(),
        }
    }
}

impl ModelConfig {
    /// Reject layer settings that cannot build a network.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(AuthorIdError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        let widths = [
            self.metrics_width,
            self.token_width,
            self.block_widths.0,
            self.block_widths.1,
            self.fusion_width,
        ];
        if widths.contains(&0) {
            return Err(AuthorIdError::Config(
                "layer widths must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum AuthorIdError {
    /// Messages and labels disagree, or a label is outside the active set.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The corpus provider returned no messages.
    #[error("Corpus is empty")]
    EmptyCorpus,

    /// The corpus has fewer distinct authors than requested.
    #[error("Requested {requested} active authors but the corpus only has {available}")]
    InsufficientAuthors {
        /// Number of authors requested.
        requested: usize,
        /// Number of distinct authors in the corpus.
        available: usize,
    },

    /// An artifact already exists under the identifier.
    #[error("Artifact already exists: {0}")]
    ArtifactExists(RunId),

    /// No artifact exists under the identifier.
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(RunId),

    /// An artifact is incomplete or its components do not belong together.
    #[error("Artifact {run_id} is corrupt: {reason}")]
    ArtifactCorrupt {
        /// Artifact identifier.
        run_id: RunId,
        /// What failed verification.
        reason: String,
    },

    /// Storage layer error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Tensor or model runtime error.
    #[error("Model error: {0}")]
    Model(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `std::result::Result<T, AuthorIdError>`.
pub type Result<T> = std::result::Result<T, AuthorIdError>;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Source of the historical message log.
pub trait CorpusProvider {
    /// Return every stored message.
    fn load_messages(&self) -> Result<Vec<MessageRecord>>;
}

/// Durable store of trained artifacts keyed by run identifier.
///
/// Implementations write a bundle as a unit: either every component is
/// visible under the identifier or none is.
pub trait ArtifactStore {
    /// Whether anything is stored under `run_id`.
    fn exists(&self, run_id: &RunId) -> Result<bool>;

    /// Persist a bundle. Fails with [`AuthorIdError::ArtifactExists`] if the
    /// identifier is taken; the existing artifact is left untouched.
    fn save(&self, bundle: &ArtifactBundle) -> Result<()>;

    /// Load and verify a bundle.
    fn load(&self, run_id: &RunId) -> Result<ArtifactBundle>;

    /// List stored artifacts, oldest first.
    fn list(&self) -> Result<Vec<ArtifactSummary>>;

    /// Attach an evaluation report to an existing artifact, replacing any
    /// previous report.
    fn record_evaluation(&self, report: &EvaluationReport) -> Result<()>;
}

/// Receiver of per-epoch training progress.
///
/// Errors returned here are logged by the trainer and never stop training.
pub trait ProgressSink {
    /// Called once after every epoch.
    fn on_epoch(&self, run_id: &RunId, report: &EpochReport) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
