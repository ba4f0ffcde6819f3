use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::Encoding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    Pending,
    Written,
    /// Destination already had identical content
    Unchanged,
    /// Processed successfully, nothing written
    DryRun,
    /// Dropped by `excludeif` before producing output
    Excluded,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Written => write!(f, "written"),
            FileStatus::Unchanged => write!(f, "unchanged"),
            FileStatus::DryRun => write!(f, "dry-run"),
            FileStatus::Excluded => write!(f, "excluded"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One source file handled by a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub source: PathBuf,
    /// Path relative to its source root, used to place the output
    pub relative: PathBuf,
    /// Final output path; replaced when the file sets `outname`
    pub destination: PathBuf,
    pub encoding: Encoding,
    pub status: FileStatus,
}

impl FileRecord {
    pub fn new(source: PathBuf, relative: PathBuf, destination: PathBuf, encoding: Encoding) -> Self {
        FileRecord {
            source,
            relative,
            destination,
            encoding,
            status: FileStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counts {
    pub processed: usize,
    pub written: usize,
    pub unchanged: usize,
    pub dry_run: usize,
    pub excluded: usize,
    pub failed: usize,
}

/// Aggregate outcome of a session run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub started: DateTime<Local>,
    pub finished: Option<DateTime<Local>>,
    pub counts: Counts,
    pub records: Vec<FileRecord>,
    /// Rendered diagnostics of every failed file
    pub errors: Vec<String>,
    /// The run stopped early because its cancel flag was raised
    #[serde(default)]
    pub cancelled: bool,
}

impl Summary {
    pub fn new(started: DateTime<Local>) -> Self {
        Summary {
            started,
            finished: None,
            counts: Counts::default(),
            records: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn push(&mut self, record: FileRecord) {
        let counts = &mut self.counts;
        match record.status {
            FileStatus::Pending => {}
            FileStatus::Written => counts.written += 1,
            FileStatus::Unchanged => counts.unchanged += 1,
            FileStatus::DryRun => counts.dry_run += 1,
            FileStatus::Excluded => counts.excluded += 1,
            FileStatus::Failed => counts.failed += 1,
        }
        if record.status != FileStatus::Pending {
            counts.processed += 1;
        }
        self.records.push(record);
    }

    pub fn finish(&mut self) {
        self.finished = Some(Local::now());
    }

    pub fn is_success(&self) -> bool {
        self.counts.failed == 0 && self.errors.is_empty()
    }

    pub fn records_with(&self, status: FileStatus) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: FileStatus) -> FileRecord {
        let mut record = FileRecord::new(
            PathBuf::from("src").join(name),
            PathBuf::from(name),
            PathBuf::from("out").join(name),
            Encoding::Utf8,
        );
        record.status = status;
        record
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::new(Local::now());
        summary.push(record("A.java", FileStatus::Written));
        summary.push(record("B.java", FileStatus::Excluded));
        summary.push(record("C.java", FileStatus::Failed));
        summary.errors.push("C.java:1: user error: boom".to_string());

        assert_eq!(
            summary.counts,
            Counts {
                processed: 3,
                written: 1,
                excluded: 1,
                failed: 1,
                ..Default::default()
            }
        );
        assert!(!summary.is_success());
        assert_eq!(summary.records_with(FileStatus::Excluded).count(), 1);
    }

    #[test]
    fn test_summary_json_roundtrip() {
        let mut summary = Summary::new(Local::now());
        summary.push(record("A.java", FileStatus::DryRun));
        summary.finish();

        let json = summary.to_json().unwrap();
        assert!(json.contains("\"status\": \"dry-run\""));
        assert!(json.contains("\"encoding\": \"utf-8\""));

        let loaded: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.counts, summary.counts);
        assert_eq!(loaded.records[0].destination, PathBuf::from("out").join("A.java"));
        assert!(loaded.finished.is_some());
    }
}
