//! Message corpus loading from JSON files.
//!
//! Accepts either a JSON array of records or JSON lines (one record per
//! line). Records use `author`/`text` or the `label`/`message` aliases and may
//! carry an RFC 3339 `timestamp`.

use authorid_core::{AuthorIdError, CorpusProvider, MessageRecord, Result};
use std::path::{Path, PathBuf};

/// Corpus backed by a JSON or JSON-lines export on disk.
#[derive(Debug, Clone)]
pub struct JsonCorpus {
    path: PathBuf,
}

impl JsonCorpus {
    /// Read messages from `path` on each load.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the export.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse records from export contents.
    pub fn parse(content: &str) -> Result<Vec<MessageRecord>> {
        if content.trim_start().starts_with('[') {
            return Ok(serde_json::from_str(content)?);
        }

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| {
                    AuthorIdError::DataIntegrity(format!("line {}: {e}", i + 1))
                })
            })
            .collect()
    }
}

impl CorpusProvider for JsonCorpus {
    fn load_messages(&self) -> Result<Vec<MessageRecord>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            AuthorIdError::Storage(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        let records = Self::parse(&content)?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "Corpus loaded");
        Ok(records)
    }
}
