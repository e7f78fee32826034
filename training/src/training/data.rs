//! Tensor assembly and batch iteration.

use crate::pipeline::FeatureMatrix;
use authorid_core::{AuthorIdError, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Metrics, tokens and labels of a set of rows, as tensors.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[n, METRICS_DIM]` f32.
    pub metrics: Tensor,
    /// `[n, token_len]` u32.
    pub tokens: Tensor,
    /// `[n]` u32 class indices.
    pub labels: Tensor,
}

impl Batch {
    /// Build tensors for `features` and their `labels`.
    pub fn from_features(
        features: &FeatureMatrix,
        labels: &[u32],
        device: &Device,
    ) -> Result<Self> {
        if features.rows != labels.len() {
            return Err(AuthorIdError::DataIntegrity(format!(
                "{} feature rows but {} labels",
                features.rows,
                labels.len()
            )));
        }
        let (metrics, tokens) = features.to_tensors(device)?;
        let labels = Tensor::new(labels, device)
            .map_err(|e| AuthorIdError::Model(format!("labels tensor: {e}")))?;
        Ok(Self {
            metrics,
            tokens,
            labels,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[u32]) -> Result<Self> {
        let select = || -> candle_core::Result<Self> {
            let idx = Tensor::new(indices, self.labels.device())?;
            Ok(Self {
                metrics: self.metrics.index_select(&idx, 0)?,
                tokens: self.tokens.index_select(&idx, 0)?,
                labels: self.labels.index_select(&idx, 0)?,
            })
        };
        select().map_err(|e| AuthorIdError::Model(format!("index_select: {e}")))
    }
}

/// Training and validation rows.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train: Batch,
    pub val: Batch,
}

impl DataSplit {
    /// Gather the rows of a partition into tensors.
    pub fn assemble(
        features: &FeatureMatrix,
        labels: &[u32],
        train_indices: &[usize],
        val_indices: &[usize],
        device: &Device,
    ) -> Result<Self> {
        if train_indices.is_empty() || val_indices.is_empty() {
            return Err(AuthorIdError::Config(format!(
                "partition has {} training and {} validation rows; both must be non-empty",
                train_indices.len(),
                val_indices.len()
            )));
        }
        let part = |indices: &[usize]| {
            let rows = features.select(indices);
            let labels: Vec<u32> = indices.iter().map(|&i| labels[i]).collect();
            Batch::from_features(&rows, &labels, device)
        };
        Ok(Self {
            train: part(train_indices)?,
            val: part(val_indices)?,
        })
    }
}

/// Mini-batch iterator over a [`Batch`]. Reshuffles indices each epoch.
pub struct BatchIterator {
    data: Batch,
    indices: Vec<u32>,
    batch_size: usize,
    pos: usize,
}

impl BatchIterator {
    pub fn new(data: Batch, batch_size: usize) -> Self {
        let n = data.len() as u32;
        Self {
            data,
            indices: (0..n).collect(),
            batch_size: batch_size.max(1),
            pos: 0,
        }
    }

    /// Reshuffle for a new epoch using a generator derived from base seed + epoch.
    pub fn reshuffle(&mut self, seed: u64, epoch: usize) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        self.indices.shuffle(&mut rng);
        self.pos = 0;
    }

    /// Returns the next mini-batch, or `None` once the epoch is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        let n = self.indices.len();
        if self.pos >= n {
            return Ok(None);
        }
        let end = (self.pos + self.batch_size).min(n);
        let batch = self.data.select(&self.indices[self.pos..end])?;
        self.pos = end;
        Ok(Some(batch))
    }
}
