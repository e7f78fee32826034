//! Filesystem artifact store.
//!
//! Each artifact is a directory named after its run identifier:
//!
//! ```text
//! <root>/<run_id>/
//!     manifest.json       run metadata + SHA-256 of every component
//!     actives.json        ordered active authors
//!     tokenizer.json      vocabulary and padded length
//!     model.safetensors   classifier weights
//!     samples.json        shuffled corpus and label indices
//!     evaluation.json     optional, written by `record_evaluation`
//! ```
//!
//! A bundle is staged in a hidden sibling directory, every file is fsynced,
//! and the staging directory is renamed into place. Readers therefore see
//! either a complete artifact or nothing.

use crate::digest;
use authorid_core::{
    ActiveAuthors, ArtifactBundle, ArtifactManifest, ArtifactStore, ArtifactSummary,
    AuthorIdError, EvaluationReport, HeldOutSamples, Result, RunId, TokenizerState,
};
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Run metadata file.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Active author ordering.
pub const ACTIVES_FILE: &str = "actives.json";
/// Tokenizer state.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Model weights.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Shuffled corpus and labels.
pub const SAMPLES_FILE: &str = "samples.json";
/// Latest evaluation report.
pub const EVALUATION_FILE: &str = "evaluation.json";

/// Components whose digests the manifest records.
const COMPONENTS: [&str; 4] = [ACTIVES_FILE, TOKENIZER_FILE, WEIGHTS_FILE, SAMPLES_FILE];

/// Artifact store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Store artifacts under `root`, created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the artifact `run_id`.
    pub fn artifact_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    fn write_staged(&self, staging: &Path, bundle: &ArtifactBundle) -> Result<()> {
        fs::create_dir(staging)?;

        let components: [(&str, Vec<u8>); 4] = [
            (ACTIVES_FILE, serde_json::to_vec_pretty(&bundle.actives)?),
            (TOKENIZER_FILE, serde_json::to_vec(&bundle.tokenizer)?),
            (WEIGHTS_FILE, bundle.weights.clone()),
            (SAMPLES_FILE, serde_json::to_vec(&bundle.samples)?),
        ];

        let mut manifest = bundle.manifest.clone();
        manifest.components.clear();
        for (name, bytes) in &components {
            write_synced(&staging.join(name), bytes)?;
            manifest.components.insert((*name).to_string(), digest(bytes));
        }
        write_synced(
            &staging.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;
        sync_dir(staging)
    }

    fn read_component(&self, run_id: &RunId, dir: &Path, name: &str) -> Result<Vec<u8>> {
        fs::read(dir.join(name)).map_err(|e| AuthorIdError::ArtifactCorrupt {
            run_id: run_id.clone(),
            reason: format!("cannot read {name}: {e}"),
        })
    }

    fn read_manifest(&self, run_id: &RunId, dir: &Path) -> Result<ArtifactManifest> {
        let bytes = self.read_component(run_id, dir, MANIFEST_FILE)?;
        parse_component(run_id, MANIFEST_FILE, &bytes)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.artifact_dir(run_id).exists())
    }

    fn save(&self, bundle: &ArtifactBundle) -> Result<()> {
        let run_id = &bundle.manifest.run_id;
        let target = self.artifact_dir(run_id);
        if target.exists() {
            return Err(AuthorIdError::ArtifactExists(run_id.clone()));
        }

        fs::create_dir_all(&self.root).map_err(|e| {
            AuthorIdError::Storage(format!("mkdir {} failed: {e}", self.root.display()))
        })?;
        let staging = self
            .root
            .join(format!(".{run_id}.staging-{}", uuid::Uuid::new_v4()));

        let result = self.write_staged(&staging, bundle).and_then(|()| {
            // re-check right before publishing; rename onto an empty dir would succeed
            if target.exists() {
                return Err(AuthorIdError::ArtifactExists(run_id.clone()));
            }
            fs::rename(&staging, &target)?;
            sync_dir(&self.root)
        });

        if let Err(e) = result {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(
                        path = %staging.display(),
                        error = %cleanup,
                        "Failed to remove staging directory"
                    );
                }
            }
            return Err(e);
        }

        info!(run_id = %run_id, path = %target.display(), "Artifact saved");
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<ArtifactBundle> {
        let dir = self.artifact_dir(run_id);
        if !dir.is_dir() {
            return Err(AuthorIdError::ArtifactNotFound(run_id.clone()));
        }

        let manifest = self.read_manifest(run_id, &dir)?;
        if manifest.run_id != *run_id {
            return Err(AuthorIdError::ArtifactCorrupt {
                run_id: run_id.clone(),
                reason: format!("manifest belongs to run {}", manifest.run_id),
            });
        }

        let mut verified = Vec::with_capacity(COMPONENTS.len());
        for name in COMPONENTS {
            let bytes = self.read_component(run_id, &dir, name)?;
            let expected = manifest.components.get(name).ok_or_else(|| {
                AuthorIdError::ArtifactCorrupt {
                    run_id: run_id.clone(),
                    reason: format!("manifest has no digest for {name}"),
                }
            })?;
            if digest(&bytes) != *expected {
                return Err(AuthorIdError::ArtifactCorrupt {
                    run_id: run_id.clone(),
                    reason: format!("{name} does not match the manifest digest"),
                });
            }
            verified.push(bytes);
        }

        let mut verified = verified.into_iter();
        let mut next = || verified.next().unwrap_or_default();
        let actives: ActiveAuthors = parse_component(run_id, ACTIVES_FILE, &next())?;
        let tokenizer: TokenizerState = parse_component(run_id, TOKENIZER_FILE, &next())?;
        let weights = next();
        let samples: HeldOutSamples = parse_component(run_id, SAMPLES_FILE, &next())?;

        if samples.messages.len() != samples.labels.len() {
            return Err(AuthorIdError::ArtifactCorrupt {
                run_id: run_id.clone(),
                reason: "held-out messages and labels differ in length".to_string(),
            });
        }
        if manifest.held_out.start > manifest.held_out.end
            || manifest.held_out.end > samples.messages.len()
        {
            return Err(AuthorIdError::ArtifactCorrupt {
                run_id: run_id.clone(),
                reason: format!(
                    "held-out rows {:?} outside {} samples",
                    manifest.held_out,
                    samples.messages.len()
                ),
            });
        }

        debug!(run_id = %run_id, classes = actives.len(), "Artifact loaded");
        Ok(ArtifactBundle {
            manifest,
            actives,
            tokenizer,
            weights,
            samples,
        })
    }

    fn list(&self) -> Result<Vec<ArtifactSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let Ok(run_id) = RunId::parse(name.as_str()) else {
                continue;
            };
            match self.read_manifest(&run_id, &entry.path()) {
                Ok(manifest) => summaries.push(ArtifactSummary {
                    run_id,
                    created_at: manifest.created_at,
                    accuracy: manifest.accuracy,
                    amount: manifest.amount,
                }),
                Err(e) => warn!(run_id = %run_id, error = %e, "Skipping unreadable artifact"),
            }
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(summaries)
    }

    fn record_evaluation(&self, report: &EvaluationReport) -> Result<()> {
        let dir = self.artifact_dir(&report.run_id);
        if !dir.is_dir() {
            return Err(AuthorIdError::ArtifactNotFound(report.run_id.clone()));
        }
        let tmp = dir.join(format!(".{EVALUATION_FILE}.tmp"));
        write_synced(&tmp, &serde_json::to_vec_pretty(report)?)?;
        fs::rename(&tmp, dir.join(EVALUATION_FILE))?;
        sync_dir(&dir)
    }
}

fn parse_component<T: DeserializeOwned>(run_id: &RunId, name: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| AuthorIdError::ArtifactCorrupt {
        run_id: run_id.clone(),
        reason: format!("cannot parse {name}: {e}"),
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authorid_core::{HeadKind, ModelConfig};
    use chrono::Utc;
    use tempfile::TempDir;

    fn bundle(id: &str, accuracy: f64) -> ArtifactBundle {
        ArtifactBundle {
            manifest: ArtifactManifest {
                run_id: RunId::parse(id).unwrap(),
                created_at: Utc::now(),
                amount: 2,
                quotient: 0.8,
                held_out: 1..2,
                seed: 42,
                head: HeadKind::Binary,
                metrics_dim: 22,
                model: ModelConfig::default(),
                accuracy,
                loss: 0.5,
                components: Default::default(),
            },
            actives: ActiveAuthors::new(vec!["alice".into(), "bob".into()]),
            tokenizer: TokenizerState {
                vocabulary: vec!["hi".into(), "there".into()],
                max_len: 3,
            },
            weights: vec![1, 2, 3, 4],
            samples: HeldOutSamples {
                messages: vec!["hi".into(), "there".into()],
                labels: vec![0, 1],
            },
        }
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let original = bundle("100", 0.75);
        store.save(&original).unwrap();

        let loaded = store.load(&original.manifest.run_id).unwrap();
        assert_eq!(loaded.actives, original.actives);
        assert_eq!(loaded.tokenizer, original.tokenizer);
        assert_eq!(loaded.weights, original.weights);
        assert_eq!(loaded.samples, original.samples);
        assert_eq!(loaded.manifest.components.len(), COMPONENTS.len());
    }

    #[test]
    fn test_save_collision_leaves_first_artifact() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let first = bundle("200", 0.9);
        store.save(&first).unwrap();
        let manifest_path = store.artifact_dir(&first.manifest.run_id).join(MANIFEST_FILE);
        let manifest_before = fs::read(&manifest_path).unwrap();

        let mut second = bundle("200", 0.1);
        second.weights = vec![9, 9];
        let err = store.save(&second).unwrap_err();
        assert!(matches!(err, AuthorIdError::ArtifactExists(_)));

        let manifest_after = fs::read(&manifest_path).unwrap();
        assert_eq!(manifest_before, manifest_after);
        let loaded = store.load(&first.manifest.run_id).unwrap();
        assert_eq!(loaded.weights, vec![1, 2, 3, 4]);

        // no staging directories left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_component_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let b = bundle("300", 0.5);
        store.save(&b).unwrap();
        fs::remove_file(store.artifact_dir(&b.manifest.run_id).join(TOKENIZER_FILE)).unwrap();

        let err = store.load(&b.manifest.run_id).unwrap_err();
        assert!(matches!(err, AuthorIdError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn test_tampered_component_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let b = bundle("400", 0.5);
        store.save(&b).unwrap();
        let actives = store.artifact_dir(&b.manifest.run_id).join(ACTIVES_FILE);
        fs::write(&actives, br#"["bob","alice"]"#).unwrap();

        let err = store.load(&b.manifest.run_id).unwrap_err();
        assert!(err.to_string().contains(ACTIVES_FILE));
    }

    #[test]
    fn test_component_from_other_run_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let a = bundle("500", 0.5);
        let mut b = bundle("501", 0.5);
        b.tokenizer.max_len = 7;
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        fs::copy(
            store.artifact_dir(&b.manifest.run_id).join(TOKENIZER_FILE),
            store.artifact_dir(&a.manifest.run_id).join(TOKENIZER_FILE),
        )
        .unwrap();

        assert!(store.load(&a.manifest.run_id).is_err());
        assert!(store.load(&b.manifest.run_id).is_ok());
    }

    #[test]
    fn test_held_out_range_beyond_samples_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let mut b = bundle("502", 0.5);
        b.manifest.held_out = 1..5;
        store.save(&b).unwrap();

        let err = store.load(&b.manifest.run_id).unwrap_err();
        assert!(matches!(err, AuthorIdError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn test_load_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store.load(&RunId::parse("nope").unwrap()).unwrap_err();
        assert!(matches!(err, AuthorIdError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_list_sorted_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let mut older = bundle("b-older", 0.4);
        older.manifest.created_at = Utc::now() - chrono::Duration::hours(1);
        store.save(&bundle("a-newer", 0.6)).unwrap();
        store.save(&older).unwrap();
        fs::create_dir(dir.path().join(".b.staging-x")).unwrap();

        let ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.run_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b-older", "a-newer"]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let store = FsArtifactStore::new("/nonexistent/authorid-models");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_record_evaluation_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let b = bundle("600", 0.5);
        store.save(&b).unwrap();

        for mean in [0.3, 0.6] {
            let report = EvaluationReport {
                run_id: b.manifest.run_id.clone(),
                per_class_f1: vec![mean, mean],
                mean_f1: mean,
                accuracy: mean,
                samples: 2,
                evaluated_at: Utc::now(),
            };
            store.record_evaluation(&report).unwrap();
        }
        let saved: EvaluationReport = serde_json::from_slice(
            &fs::read(store.artifact_dir(&b.manifest.run_id).join(EVALUATION_FILE)).unwrap(),
        )
        .unwrap();
        assert!((saved.mean_f1 - 0.6).abs() < 1e-12);
        // evaluation does not disturb the verified components
        assert!(store.load(&b.manifest.run_id).is_ok());
    }
}
