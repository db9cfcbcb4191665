//! Secondary store: one record per committed run.
//!
//! The chronicle is authoritative. A history sink that fails is logged and
//! ignored by the pipeline.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scaffold_core::paths;

use crate::error::{io_err, SyncError};
use crate::oracle::Summary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub run_id: Uuid,
    pub timestamp_utc: DateTime<Utc>,
    pub blueprint: String,
    pub summary: Summary,
    /// Seal of the chronicle this run committed.
    pub seal: String,
}

pub trait HistorySink {
    fn record(&self, record: &HistoryRecord) -> Result<(), SyncError>;
}

/// Appends JSON lines to `<root>/.scaffold/history.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn at(root: &Path) -> Self {
        Self {
            path: paths::history_path(root),
        }
    }
}

impl HistorySink for JsonlHistory {
    fn record(&self, record: &HistoryRecord) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| io_err(&self.path, e))
    }
}

/// Discards every record; used when `history: false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistorySink for NoHistory {
    fn record(&self, _record: &HistoryRecord) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Read every record under `root`, oldest first. Unparseable lines are skipped.
pub fn read_at(root: &Path) -> Result<Vec<HistoryRecord>, SyncError> {
    let path = paths::history_path(root);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&path, e)),
    };
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(&path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("{}:{}: skipping history line: {e}", path.display(), idx + 1),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(created: usize) -> HistoryRecord {
        HistoryRecord {
            run_id: Uuid::new_v4(),
            timestamp_utc: Utc::now(),
            blueprint: "blueprint.scaffold".to_string(),
            summary: Summary {
                created,
                ..Summary::default()
            },
            seal: "abc".to_string(),
        }
    }

    #[test]
    fn records_append_in_order() {
        let root = TempDir::new().expect("root");
        let sink = JsonlHistory::at(root.path());
        sink.record(&record(1)).expect("first");
        sink.record(&record(2)).expect("second");

        let records = read_at(root.path()).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].summary.created, 1);
        assert_eq!(records[1].summary.created, 2);
    }

    #[test]
    fn missing_file_reads_as_empty_and_garbage_is_skipped() {
        let root = TempDir::new().expect("root");
        assert!(read_at(root.path()).expect("read").is_empty());

        let sink = JsonlHistory::at(root.path());
        sink.record(&record(3)).expect("record");
        let path = paths::history_path(root.path());
        let mut contents = std::fs::read_to_string(&path).expect("read");
        contents.push_str("not json\n");
        std::fs::write(&path, contents).expect("write");

        assert_eq!(read_at(root.path()).expect("read").len(), 1);
    }

    #[test]
    fn no_history_writes_nothing() {
        let root = TempDir::new().expect("root");
        NoHistory.record(&record(1)).expect("record");
        assert!(!paths::history_path(root.path()).exists());
    }
}
