use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// A normalized change notification for one path inside the watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Bare file name of the event's path, if it has one that is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Request to copy a stored snapshot back over its live file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    pub target_file_name: String,
    pub backup_timestamp: u64,
}

impl BackupRequest {
    pub fn new(target_file_name: impl Into<String>, backup_timestamp: u64) -> Self {
        Self {
            target_file_name: target_file_name.into(),
            backup_timestamp,
        }
    }
}

/// Single-shot value that starts the orderly shutdown of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSignal;

/// Result of the most recent backup or restore, carried in published snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    BackupCreated { file: String, timestamp: u64 },
    BackupFailed { file: String, reason: String },
    Restored { file: String, timestamp: u64 },
    RestoreFailed { file: String, timestamp: u64, reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::BackupFailed { .. } | Outcome::RestoreFailed { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Outcome::BackupCreated { file, timestamp } => {
                format!("backed up '{}' at {}", file, format_timestamp(*timestamp))
            }
            Outcome::BackupFailed { file, reason } => {
                format!("backup of '{}' failed: {}", file, reason)
            }
            Outcome::Restored { file, timestamp } => {
                format!("restored '{}' to {}", file, format_timestamp(*timestamp))
            }
            Outcome::RestoreFailed { file, timestamp, reason } => format!(
                "restore of '{}' to {} failed: {}",
                file,
                format_timestamp(*timestamp),
                reason
            ),
        }
    }
}

/// Immutable view of the coordinator's state, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// File name to ascending backup timestamps.
    pub files: BTreeMap<String, Vec<u64>>,
    pub last_outcome: Option<Outcome>,
}

impl BackupSnapshot {
    pub fn timestamps(&self, file: &str) -> &[u64] {
        self.files.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_backups(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Renders epoch milliseconds in local time, e.g. `2024-03-01 18:22:05 042ms`.
pub fn format_timestamp(millis: u64) -> String {
    let Ok(millis) = i64::try_from(millis) else {
        return format!("{}ms", millis);
    };
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(utc) => utc
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S %3fms")
            .to_string(),
        None => format!("{}ms", millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_of_event() {
        let event = FileEvent::new("/saves/profile/S0000.sl2", FileEventKind::Modified);
        assert_eq!(event.file_name(), Some("S0000.sl2"));

        let root = FileEvent::new("/", FileEventKind::Deleted);
        assert_eq!(root.file_name(), None);
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut snapshot = BackupSnapshot::default();
        snapshot.files.insert("a.sav".to_string(), vec![1, 2, 3]);
        snapshot.files.insert("b.sav".to_string(), vec![]);

        assert_eq!(snapshot.timestamps("a.sav"), &[1, 2, 3]);
        assert!(snapshot.timestamps("missing").is_empty());
        assert_eq!(snapshot.total_backups(), 3);
    }

    #[test]
    fn test_outcome_failure_flag() {
        let ok = Outcome::Restored { file: "a".into(), timestamp: 5 };
        let failed = Outcome::BackupFailed { file: "a".into(), reason: "disk full".into() };
        assert!(!ok.is_failure());
        assert!(failed.is_failure());
        assert!(failed.describe().contains("disk full"));
    }

    #[test]
    fn test_format_timestamp_has_millis_suffix() {
        let formatted = format_timestamp(1_700_000_000_042);
        assert!(formatted.ends_with("042ms"), "got {}", formatted);
        assert_eq!(formatted.len(), "2023-11-14 22:13:20 042ms".len());
    }
}
