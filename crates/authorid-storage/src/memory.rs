//! In-memory storage backends for testing.
//!
//! Stores all data in memory. Not intended for production use.

use authorid_core::{
    ArtifactBundle, ArtifactStore, ArtifactSummary, AuthorIdError, CorpusProvider,
    EvaluationReport, MessageRecord, Result, RunId,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// ===========================================================================
// MemoryCorpus
// ===========================================================================

/// Corpus held in a vector.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    records: Vec<MessageRecord>,
}

impl MemoryCorpus {
    /// Wrap a list of records.
    pub fn new(records: Vec<MessageRecord>) -> Self {
        Self { records }
    }

    /// Build a corpus from `(author, text)` pairs.
    pub fn from_pairs<A: Into<String>, T: Into<String>>(
        pairs: impl IntoIterator<Item = (A, T)>,
    ) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(author, text)| MessageRecord::new(author, text))
                .collect(),
        )
    }
}

impl CorpusProvider for MemoryCorpus {
    fn load_messages(&self) -> Result<Vec<MessageRecord>> {
        Ok(self.records.clone())
    }
}

// ===========================================================================
// InMemoryArtifactStore
// ===========================================================================

struct StoredArtifact {
    bundle: ArtifactBundle,
    evaluation: Option<EvaluationReport>,
}

/// In-memory artifact store for testing.
///
/// Data is lost when the struct is dropped.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: Mutex<HashMap<RunId, StoredArtifact>>,
}

impl InMemoryArtifactStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RunId, StoredArtifact>>> {
        self.artifacts
            .lock()
            .map_err(|e| AuthorIdError::Storage(format!("artifact map lock poisoned: {e}")))
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest evaluation recorded for `run_id`.
    pub fn evaluation(&self, run_id: &RunId) -> Option<EvaluationReport> {
        self.lock()
            .ok()?
            .get(run_id)
            .and_then(|stored| stored.evaluation.clone())
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn exists(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.lock()?.contains_key(run_id))
    }

    fn save(&self, bundle: &ArtifactBundle) -> Result<()> {
        let mut artifacts = self.lock()?;
        let run_id = &bundle.manifest.run_id;
        if artifacts.contains_key(run_id) {
            return Err(AuthorIdError::ArtifactExists(run_id.clone()));
        }
        artifacts.insert(
            run_id.clone(),
            StoredArtifact {
                bundle: bundle.clone(),
                evaluation: None,
            },
        );
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<ArtifactBundle> {
        self.lock()?
            .get(run_id)
            .map(|stored| stored.bundle.clone())
            .ok_or_else(|| AuthorIdError::ArtifactNotFound(run_id.clone()))
    }

    fn list(&self) -> Result<Vec<ArtifactSummary>> {
        let mut summaries: Vec<ArtifactSummary> = self
            .lock()?
            .values()
            .map(|stored| ArtifactSummary {
                run_id: stored.bundle.manifest.run_id.clone(),
                created_at: stored.bundle.manifest.created_at,
                accuracy: stored.bundle.manifest.accuracy,
                amount: stored.bundle.manifest.amount,
            })
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(summaries)
    }

    fn record_evaluation(&self, report: &EvaluationReport) -> Result<()> {
        let mut artifacts = self.lock()?;
        let stored = artifacts
            .get_mut(&report.run_id)
            .ok_or_else(|| AuthorIdError::ArtifactNotFound(report.run_id.clone()))?;
        stored.evaluation = Some(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authorid_core::{
        ActiveAuthors, ArtifactManifest, HeadKind, HeldOutSamples, ModelConfig, TokenizerState,
    };
    use chrono::Utc;

    fn bundle(id: &str) -> ArtifactBundle {
        ArtifactBundle {
            manifest: ArtifactManifest {
                run_id: RunId::parse(id).unwrap(),
                created_at: Utc::now(),
                amount: 3,
                quotient: 0.5,
                held_out: 0..0,
                seed: 1,
                head: HeadKind::MultiClass,
                metrics_dim: 22,
                model: ModelConfig::default(),
                accuracy: 0.5,
                loss: 1.0,
                components: Default::default(),
            },
            actives: ActiveAuthors::new(vec!["a".into(), "b".into(), "c".into()]),
            tokenizer: TokenizerState {
                vocabulary: vec![],
                max_len: 1,
            },
            weights: vec![0; 8],
            samples: HeldOutSamples {
                messages: vec![],
                labels: vec![],
            },
        }
    }

    #[test]
    fn test_memory_corpus_returns_records() {
        let corpus = MemoryCorpus::from_pairs([("a", "x"), ("b", "y")]);
        let records = corpus.load_messages().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].author, "b");
    }

    #[test]
    fn test_save_collision() {
        let store = InMemoryArtifactStore::new();
        store.save(&bundle("x")).unwrap();
        let err = store.save(&bundle("x")).unwrap_err();
        assert!(matches!(err, AuthorIdError::ArtifactExists(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_and_evaluation() {
        let store = InMemoryArtifactStore::new();
        let b = bundle("y");
        store.save(&b).unwrap();
        assert!(store.exists(&b.manifest.run_id).unwrap());
        assert_eq!(store.load(&b.manifest.run_id).unwrap().actives, b.actives);

        let report = EvaluationReport {
            run_id: b.manifest.run_id.clone(),
            per_class_f1: vec![1.0, 0.0, 0.5],
            mean_f1: 0.5,
            accuracy: 0.6,
            samples: 5,
            evaluated_at: Utc::now(),
        };
        store.record_evaluation(&report).unwrap();
        assert_eq!(store.evaluation(&b.manifest.run_id), Some(report));
    }

    #[test]
    fn test_record_evaluation_unknown_artifact() {
        let store = InMemoryArtifactStore::new();
        let report = EvaluationReport {
            run_id: RunId::parse("missing").unwrap(),
            per_class_f1: vec![],
            mean_f1: 0.0,
            accuracy: 0.0,
            samples: 0,
            evaluated_at: Utc::now(),
        };
        assert!(store.record_evaluation(&report).is_err());
    }
}
