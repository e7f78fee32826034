//! Train, predict, fmeasure and k-fold workflows.
//!
//! [`Orchestrator`] wires the corpus provider, artifact store and progress
//! sink to the pipeline and the trainer. Every workflow is synchronous and
//! runs on the CPU device.

use crate::pipeline::{
    decode_label, prepare_corpus, single_split, FeatureFuser, FeatureMatrix, PreparedCorpus,
    SlidingKFold,
};
use crate::training::data::{Batch, DataSplit};
use crate::training::metrics::{
    compute_classification_metrics, sample_variance, ClassificationMetrics,
};
use crate::training::trainer::{self, TrainConfig, TrainingOutcome};
use authorid_core::{
    ArtifactBundle, ArtifactManifest, ArtifactStore, ArtifactSummary, AuthorIdError,
    CorpusProvider, EvaluationReport, HeldOutSamples, ModelConfig, ProgressSink, Result, RunId,
    TrainingConfig,
};
use authorid_features::{
    classifier_head_config, serialize_weights, AuthorClassifier, ClassifierDims, METRICS_DIM,
};
use candle_core::Device;
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use std::ops::Range;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of a single training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub run_id: RunId,
    pub accuracy: f64,
    pub loss: f64,
    pub best_epoch: usize,
    pub epochs_run: usize,
    /// Messages kept per author after balancing.
    pub least_count: usize,
    pub authors: Vec<String>,
}

/// Result of one k-fold fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldResult {
    pub index: usize,
    pub run_id: RunId,
    pub test: Range<usize>,
    pub accuracy: f64,
    pub loss: f64,
    pub best_epoch: usize,
}

/// Summary of a k-fold evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct KFoldReport {
    pub folds: Vec<FoldResult>,
    /// Rows per test window.
    pub window: usize,
    pub mean_accuracy: f64,
    /// Sample variance of fold accuracies; `None` with a single fold.
    pub variance: Option<f64>,
}

impl KFoldReport {
    pub fn accuracies(&self) -> Vec<f64> {
        self.folds.iter().map(|f| f.accuracy).collect()
    }
}

/// Author probabilities for one message, most likely first.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub run_id: RunId,
    pub ranking: Vec<(String, f32)>,
}

impl Prediction {
    /// The most likely author and its probability.
    pub fn best(&self) -> Option<(&str, f32)> {
        self.ranking.first().map(|(a, p)| (a.as_str(), *p))
    }
}

/// Evaluation of a stored model on its held-out rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FMeasure {
    pub report: EvaluationReport,
    pub authors: Vec<String>,
    pub metrics: ClassificationMetrics,
}

/// Runs the workflows against a corpus, a store and a progress sink.
pub struct Orchestrator {
    corpus: Arc<dyn CorpusProvider + Send + Sync>,
    store: Arc<dyn ArtifactStore + Send + Sync>,
    progress: Arc<dyn ProgressSink + Send + Sync>,
    training: TrainingConfig,
    model: ModelConfig,
    device: Device,
}

impl Orchestrator {
    pub fn new(
        corpus: Arc<dyn CorpusProvider + Send + Sync>,
        store: Arc<dyn ArtifactStore + Send + Sync>,
        progress: Arc<dyn ProgressSink + Send + Sync>,
        training: TrainingConfig,
        model: ModelConfig,
    ) -> Self {
        Self {
            corpus,
            store,
            progress,
            training,
            model,
            device: Device::Cpu,
        }
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training
    }

    /// Train once and persist under the current unix timestamp.
    pub fn train(&self) -> Result<TrainReport> {
        self.train_as(RunId::for_training(Utc::now()))
    }

    /// Train once and persist under `run_id`.
    ///
    /// Fails before loading the corpus if `run_id` is taken, and again at
    /// persist time if it was taken meanwhile.
    pub fn train_as(&self, run_id: RunId) -> Result<TrainReport> {
        self.training.validate()?;
        self.model.validate()?;
        if self.store.exists(&run_id)? {
            return Err(AuthorIdError::ArtifactExists(run_id));
        }

        let prepared = self.prepare()?;
        let (fuser, features) = FeatureFuser::fit(&prepared.messages)?;
        let split = single_split(prepared.len(), self.training.quotient)?;
        info!(
            run_id = %run_id,
            train = split.train.len(),
            test = split.test.len(),
            "Single split"
        );

        let train_rows: Vec<usize> = split.train.clone().collect();
        let test_rows: Vec<usize> = split.test.clone().collect();
        let config = TrainConfig::from_training(&self.training, self.training.max_epochs);
        let (varmap, outcome) =
            self.fit_model(&prepared, &features, &train_rows, &test_rows, &config, &run_id)?;

        let bundle = self.bundle(
            run_id.clone(),
            &prepared,
            &fuser,
            &varmap,
            &outcome,
            split.test,
        )?;
        self.store.save(&bundle)?;

        info!(
            run_id = %run_id,
            accuracy = outcome.val_accuracy,
            loss = outcome.val_loss,
            "Training run persisted"
        );
        Ok(TrainReport {
            run_id,
            accuracy: outcome.val_accuracy,
            loss: outcome.val_loss,
            best_epoch: outcome.best_epoch,
            epochs_run: outcome.history.len(),
            least_count: prepared.least_count,
            authors: prepared.actives.as_slice().to_vec(),
        })
    }

    /// Train a fresh model per sliding fold and persist each one.
    pub fn kfold(&self) -> Result<KFoldReport> {
        self.kfold_started_at(Utc::now())
    }

    /// K-fold evaluation whose fold identifiers use `started` as stamp.
    pub fn kfold_started_at(&self, started: DateTime<Utc>) -> Result<KFoldReport> {
        self.training.validate()?;
        self.model.validate()?;
        let stamp = format!("{}-fold", started.timestamp());
        if let Some(existing) = self
            .store
            .list()?
            .into_iter()
            .find(|s| s.run_id.as_str().starts_with(&stamp))
        {
            return Err(AuthorIdError::ArtifactExists(existing.run_id));
        }

        let prepared = self.prepare()?;
        let (fuser, features) = FeatureFuser::fit(&prepared.messages)?;
        let kfold = SlidingKFold::new(prepared.len(), self.training.quotient)?;
        let window = kfold.width();
        info!(
            folds = kfold.fold_count(),
            window,
            total = prepared.len(),
            "K-fold evaluation started"
        );

        let config = TrainConfig::from_training(&self.training, self.training.kfold_max_epochs);
        let mut folds = Vec::new();
        for fold in kfold {
            let progress_id = RunId::parse(format!("{stamp}{}", fold.index))?;
            let (varmap, outcome) = self.fit_model(
                &prepared,
                &features,
                &fold.train_indices(),
                &fold.test_indices(),
                &config,
                &progress_id,
            )?;

            let run_id = RunId::for_fold(
                started,
                fold.index,
                outcome.val_accuracy,
                self.training.amount,
                self.training.quotient,
            );
            let bundle = self.bundle(
                run_id.clone(),
                &prepared,
                &fuser,
                &varmap,
                &outcome,
                fold.test.clone(),
            )?;
            self.store.save(&bundle)?;
            info!(
                run_id = %run_id,
                fold = fold.index,
                accuracy = outcome.val_accuracy,
                "Fold persisted"
            );

            folds.push(FoldResult {
                index: fold.index,
                run_id,
                test: fold.test,
                accuracy: outcome.val_accuracy,
                loss: outcome.val_loss,
                best_epoch: outcome.best_epoch,
            });
        }

        let accuracies: Vec<f64> = folds.iter().map(|f| f.accuracy).collect();
        let mean_accuracy = accuracies.iter().sum::<f64>() / accuracies.len().max(1) as f64;
        let variance = sample_variance(&accuracies);
        match variance {
            Some(v) => info!(folds = folds.len(), mean_accuracy, variance = v, "K-fold finished"),
            None => warn!(
                folds = folds.len(),
                "Fold variance needs at least two folds; lower the quotient or add data"
            ),
        }

        Ok(KFoldReport {
            folds,
            window,
            mean_accuracy,
            variance,
        })
    }

    /// Rank the active authors of a stored model for `message`.
    pub fn predict(&self, run_id: &RunId, message: &str) -> Result<Prediction> {
        let bundle = self.store.load(run_id)?;
        let (model, fuser) = load_model(&bundle, &self.device)?;
        let (metrics, tokens) = fuser.transform(&[message]).to_tensors(&self.device)?;
        let probs = model
            .predict_proba(&metrics, &tokens)?
            .into_iter()
            .next()
            .ok_or_else(|| AuthorIdError::Model("model returned no rows".to_string()))?;

        let mut ranking: Vec<(String, f32)> = probs
            .into_iter()
            .enumerate()
            .map(|(i, p)| decode_label(i as u32, &bundle.actives).map(|a| (a.to_string(), p)))
            .collect::<Result<_>>()?;
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(Prediction {
            run_id: run_id.clone(),
            ranking,
        })
    }

    /// Per-author F1 of a stored model on its held-out rows.
    ///
    /// The report is attached to the artifact, replacing any earlier one.
    pub fn fmeasure(&self, run_id: &RunId) -> Result<FMeasure> {
        let bundle = self.store.load(run_id)?;
        let (model, fuser) = load_model(&bundle, &self.device)?;

        let rows = bundle.manifest.held_out.clone();
        let messages = &bundle.samples.messages[rows.clone()];
        let labels = &bundle.samples.labels[rows];
        let data = Batch::from_features(&fuser.transform(messages), labels, &self.device)?;
        let predictions = trainer::predict_classes(&model, &data)?;
        let metrics = compute_classification_metrics(&predictions, labels, bundle.actives.len())?;

        let report = EvaluationReport {
            run_id: run_id.clone(),
            per_class_f1: metrics.f1_scores(),
            mean_f1: metrics.mean_f1,
            accuracy: metrics.accuracy,
            samples: labels.len(),
            evaluated_at: Utc::now(),
        };
        self.store.record_evaluation(&report)?;
        info!(run_id = %run_id, %metrics, "F-measure recorded");

        Ok(FMeasure {
            report,
            authors: bundle.actives.as_slice().to_vec(),
            metrics,
        })
    }

    /// Stored artifacts, oldest first.
    pub fn list(&self) -> Result<Vec<ArtifactSummary>> {
        self.store.list()
    }

    fn prepare(&self) -> Result<PreparedCorpus> {
        let records = self.corpus.load_messages()?;
        prepare_corpus(records, self.training.amount, self.training.seed)
    }

    fn fit_model(
        &self,
        prepared: &PreparedCorpus,
        features: &FeatureMatrix,
        train_rows: &[usize],
        test_rows: &[usize],
        config: &TrainConfig,
        run_id: &RunId,
    ) -> Result<(VarMap, TrainingOutcome)> {
        let split = DataSplit::assemble(
            features,
            &prepared.labels,
            train_rows,
            test_rows,
            &self.device,
        )?;
        let dims = ClassifierDims {
            metrics_dim: METRICS_DIM,
            token_len: features.token_len,
            classes: prepared.actives.len(),
        };
        let varmap = VarMap::new();
        let model = AuthorClassifier::new_trainable(&varmap, dims, &self.model, &self.device)?;
        let outcome = trainer::fit(&model, &varmap, &split, config, run_id, &*self.progress)?;
        Ok((varmap, outcome))
    }

    fn bundle(
        &self,
        run_id: RunId,
        prepared: &PreparedCorpus,
        fuser: &FeatureFuser,
        varmap: &VarMap,
        outcome: &TrainingOutcome,
        held_out: Range<usize>,
    ) -> Result<ArtifactBundle> {
        Ok(ArtifactBundle {
            manifest: ArtifactManifest {
                run_id,
                created_at: Utc::now(),
                amount: self.training.amount,
                quotient: self.training.quotient,
                held_out,
                seed: self.training.seed,
                head: classifier_head_config(prepared.actives.len()).kind,
                metrics_dim: METRICS_DIM,
                model: self.model.clone(),
                accuracy: outcome.val_accuracy,
                loss: outcome.val_loss,
                components: Default::default(),
            },
            actives: prepared.actives.clone(),
            tokenizer: fuser.tokenizer().state().clone(),
            weights: serialize_weights(varmap)?,
            samples: HeldOutSamples {
                messages: prepared.messages.clone(),
                labels: prepared.labels.clone(),
            },
        })
    }
}

/// Rebuild the classifier and feature fuser of a loaded artifact.
///
/// Rejects bundles whose parts disagree about the class count or the metrics
/// width before any weights are read.
pub fn load_model(
    bundle: &ArtifactBundle,
    device: &Device,
) -> Result<(AuthorClassifier, FeatureFuser)> {
    let manifest = &bundle.manifest;
    let corrupt = |reason: String| AuthorIdError::ArtifactCorrupt {
        run_id: manifest.run_id.clone(),
        reason,
    };

    let classes = bundle.actives.len();
    if classes != manifest.amount {
        return Err(corrupt(format!(
            "{classes} active authors but the manifest records amount {}",
            manifest.amount
        )));
    }
    if classifier_head_config(classes).kind != manifest.head {
        return Err(corrupt(format!(
            "head {:?} does not fit {classes} classes",
            manifest.head
        )));
    }
    if manifest.metrics_dim != METRICS_DIM {
        return Err(corrupt(format!(
            "model expects {} metrics, this build computes {METRICS_DIM}",
            manifest.metrics_dim
        )));
    }
    if let Some(&label) = bundle.samples.labels.iter().find(|&&l| l as usize >= classes) {
        return Err(corrupt(format!("sample label {label} outside {classes} classes")));
    }

    let dims = ClassifierDims {
        metrics_dim: manifest.metrics_dim,
        token_len: bundle.tokenizer.max_len,
        classes,
    };
    let model =
        AuthorClassifier::from_safetensors(bundle.weights.clone(), dims, &manifest.model, device)
            .map_err(|e| corrupt(format!("weights do not fit the manifest: {e}")))?;
    let fuser = FeatureFuser::from_tokenizer(bundle.tokenizer.clone())?;
    Ok((model, fuser))
}
