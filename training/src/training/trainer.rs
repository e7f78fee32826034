//! Training loop for the author classifier with early stopping.

use crate::training::data::{Batch, BatchIterator, DataSplit};
use crate::training::metrics::accuracy;
use authorid_core::{AuthorIdError, EpochReport, ProgressSink, Result, RunId, TrainingConfig};
use authorid_features::AuthorClassifier;
use candle_core::Tensor;
use candle_nn::{Optimizer, VarMap};
use tracing::{debug, info, warn};

/// Optimiser and stopping settings of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub lr: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub patience: usize,
    /// Base seed of the per-epoch batch order.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            batch_size: 64,
            max_epochs: 100,
            patience: 10,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Settings from the `training` config section with the given epoch budget.
    pub fn from_training(config: &TrainingConfig, max_epochs: usize) -> Self {
        Self {
            lr: config.learning_rate,
            batch_size: config.batch_size,
            max_epochs,
            patience: config.patience,
            seed: config.seed,
        }
    }
}

/// Result of a training run. The model holds the best epoch's weights.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub history: Vec<EpochReport>,
    /// One-based epoch whose weights were kept.
    pub best_epoch: usize,
    /// Validation loss of the kept weights.
    pub val_loss: f64,
    /// Validation accuracy of the kept weights.
    pub val_accuracy: f64,
    /// Whether patience ran out before the epoch budget.
    pub stopped_early: bool,
}

/// Train `model` (whose variables live in `varmap`) on `split`.
///
/// Stops after `patience` epochs without a lower validation loss and restores
/// the variables of the best epoch before returning. Fails with
/// [`AuthorIdError::Model`] when no epoch yields a finite validation loss.
pub fn fit(
    model: &AuthorClassifier,
    varmap: &VarMap,
    split: &DataSplit,
    config: &TrainConfig,
    run_id: &RunId,
    progress: &dyn ProgressSink,
) -> Result<TrainingOutcome> {
    let head = model.head();
    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        candle_nn::ParamsAdamW {
            lr: config.lr,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
    .map_err(|e| AuthorIdError::Model(format!("Failed to create optimizer: {e}")))?;

    let mut best: Option<(usize, f64, f64, Vec<(String, Tensor)>)> = None;
    let mut patience_counter = 0usize;
    let mut history: Vec<EpochReport> = Vec::new();
    let mut stopped_early = false;

    let mut batches = BatchIterator::new(split.train.clone(), config.batch_size);

    info!(
        run_id = %run_id,
        train = split.train.len(),
        val = split.val.len(),
        lr = config.lr,
        batch_size = config.batch_size,
        max_epochs = config.max_epochs,
        patience = config.patience,
        "Training started"
    );

    for epoch in 0..config.max_epochs {
        batches.reshuffle(config.seed, epoch);

        let mut epoch_loss = 0.0;
        let mut batch_count = 0usize;
        while let Some(batch) = batches.next_batch()? {
            let logits = model.forward_logits(&batch.metrics, &batch.tokens, true)?;
            let loss = head.loss(&logits, &batch.labels)?;
            optimizer
                .backward_step(&loss)
                .map_err(|e| AuthorIdError::Model(format!("Backward step failed: {e}")))?;

            let loss_val = scalar(&loss)?;
            debug!(epoch = epoch + 1, batch = batch_count, loss = loss_val, "Batch done");
            epoch_loss += loss_val;
            batch_count += 1;
        }
        let train_loss = if batch_count > 0 {
            epoch_loss / batch_count as f64
        } else {
            0.0
        };

        let (val_loss, val_accuracy) = evaluate(model, &split.val)?;

        let improved = best.as_ref().map_or(val_loss.is_finite(), |b| val_loss < b.1);
        if improved {
            best = Some((epoch + 1, val_loss, val_accuracy, snapshot(varmap)?));
            patience_counter = 0;
        } else {
            patience_counter += 1;
        }

        let report = EpochReport {
            epoch: epoch + 1,
            train_loss,
            val_loss,
            val_accuracy,
            improved,
        };
        if let Err(e) = progress.on_epoch(run_id, &report) {
            warn!(run_id = %run_id, epoch = epoch + 1, error = %e, "Progress sink failed");
        }
        history.push(report);

        if !improved && patience_counter >= config.patience {
            info!(
                run_id = %run_id,
                epoch = epoch + 1,
                patience = config.patience,
                "Early stopping"
            );
            stopped_early = true;
            break;
        }
    }

    let (best_epoch, val_loss, val_accuracy, weights) = best.ok_or_else(|| {
        warn!(run_id = %run_id, epochs = history.len(), "No usable epoch");
        AuthorIdError::Model("no epoch produced a finite validation loss".to_string())
    })?;
    restore(varmap, &weights)?;
    let outcome = TrainingOutcome {
        history,
        best_epoch,
        val_loss,
        val_accuracy,
        stopped_early,
    };

    info!(
        run_id = %run_id,
        best_epoch = outcome.best_epoch,
        val_loss = outcome.val_loss,
        val_accuracy = outcome.val_accuracy,
        "Training finished"
    );
    Ok(outcome)
}

/// Validation loss and accuracy of `model` on `data`.
pub fn evaluate(model: &AuthorClassifier, data: &Batch) -> Result<(f64, f64)> {
    if data.is_empty() {
        return Ok((0.0, 0.0));
    }
    let head = model.head();
    let logits = model.forward_logits(&data.metrics, &data.tokens, false)?;
    let loss = scalar(&head.loss(&logits, &data.labels)?)?;
    let predictions = to_u32s(&head.predict_classes(&logits)?)?;
    let labels = to_u32s(&data.labels)?;
    Ok((loss, accuracy(&predictions, &labels)))
}

/// Predicted class index of every row.
pub fn predict_classes(model: &AuthorClassifier, data: &Batch) -> Result<Vec<u32>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let logits = model.forward_logits(&data.metrics, &data.tokens, false)?;
    to_u32s(&model.head().predict_classes(&logits)?)
}

fn scalar(t: &Tensor) -> Result<f64> {
    t.to_scalar::<f32>()
        .map(f64::from)
        .map_err(|e| AuthorIdError::Model(format!("Loss scalar failed: {e}")))
}

fn to_u32s(t: &Tensor) -> Result<Vec<u32>> {
    t.to_vec1::<u32>()
        .map_err(|e| AuthorIdError::Model(format!("Tensor to vec failed: {e}")))
}

fn snapshot(varmap: &VarMap) -> Result<Vec<(String, Tensor)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| AuthorIdError::Model(format!("Variable map lock poisoned: {e}")))?;
    data.iter()
        .map(|(name, var)| {
            var.as_tensor()
                .copy()
                .map(|t| (name.clone(), t))
                .map_err(|e| AuthorIdError::Model(format!("Failed to copy {name}: {e}")))
        })
        .collect()
}

fn restore(varmap: &VarMap, weights: &[(String, Tensor)]) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| AuthorIdError::Model(format!("Variable map lock poisoned: {e}")))?;
    for (name, tensor) in weights {
        let var = data
            .get(name)
            .ok_or_else(|| AuthorIdError::Model(format!("Variable {name} disappeared")))?;
        var.set(tensor)
            .map_err(|e| AuthorIdError::Model(format!("Failed to restore {name}: {e}")))?;
    }
    Ok(())
}
