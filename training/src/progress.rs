//! Progress sinks.

use authorid_core::{AuthorIdError, EpochReport, ProgressSink, Result, RunId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Logs every epoch through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_epoch(&self, run_id: &RunId, report: &EpochReport) -> Result<()> {
        info!(
            run_id = %run_id,
            epoch = report.epoch,
            train_loss = report.train_loss,
            val_loss = report.val_loss,
            val_accuracy = report.val_accuracy,
            improved = report.improved,
            "Epoch finished"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct ProgressLine<'a> {
    run_id: &'a RunId,
    recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a EpochReport,
}

/// Appends one JSON object per epoch to a file.
#[derive(Debug, Clone)]
pub struct JsonlProgress {
    path: PathBuf,
}

impl JsonlProgress {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for JsonlProgress {
    fn on_epoch(&self, run_id: &RunId, report: &EpochReport) -> Result<()> {
        let mut line = serde_json::to_vec(&ProgressLine {
            run_id,
            recorded_at: Utc::now(),
            report,
        })?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                AuthorIdError::Storage(format!(
                    "Failed to open progress file {}: {e}",
                    self.path.display()
                ))
            })?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Forwards every report to all inner sinks.
///
/// Every sink is called even if an earlier one fails; the first error is
/// returned.
#[derive(Default)]
pub struct ProgressFanOut {
    sinks: Vec<Box<dyn ProgressSink + Send + Sync>>,
}

impl ProgressFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: impl ProgressSink + Send + Sync + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for ProgressFanOut {
    fn on_epoch(&self, run_id: &RunId, report: &EpochReport) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.on_epoch(run_id, report) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report(epoch: usize) -> EpochReport {
        EpochReport {
            epoch,
            train_loss: 0.9,
            val_loss: 0.8,
            val_accuracy: 0.5,
            improved: true,
        }
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlProgress::new(dir.path().join("progress.jsonl"));
        let run_id = RunId::parse("42").unwrap();
        sink.on_epoch(&run_id, &report(1)).unwrap();
        sink.on_epoch(&run_id, &report(2)).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["run_id"], "42");
        assert_eq!(lines[1]["epoch"], 2);
        assert!(lines[1]["recorded_at"].is_string());
    }

    #[test]
    fn test_jsonl_unwritable_path_errors() {
        let sink = JsonlProgress::new("/nonexistent/dir/progress.jsonl");
        let run_id = RunId::parse("1").unwrap();
        assert!(sink.on_epoch(&run_id, &report(1)).is_err());
    }

    #[test]
    fn test_fan_out_calls_every_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.jsonl");
        let fan = ProgressFanOut::new()
            .with(JsonlProgress::new("/nonexistent/dir/p.jsonl"))
            .with(TracingProgress)
            .with(JsonlProgress::new(&path));
        assert_eq!(fan.len(), 3);

        let run_id = RunId::parse("7").unwrap();
        assert!(fan.on_epoch(&run_id, &report(1)).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_empty_fan_out_is_ok() {
        let fan = ProgressFanOut::new();
        assert!(fan.is_empty());
        assert!(fan.on_epoch(&RunId::parse("1").unwrap(), &report(1)).is_ok());
    }
}
