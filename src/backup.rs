//! Per-file snapshot history with rotation, cooldown and restore.
//!
//! Snapshots of a file `F` live in `<backup_root>/F/<millis>`, each holding the
//! full content of `F` at that instant. A manager keeps its records sorted by
//! timestamp and never holds more than `max_backup_file_count` of them.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::BackupError;

/// One stored snapshot. The timestamp identifies it within its manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created { timestamp: u64, evicted: Vec<u64> },
    /// Inside the cooldown window; nothing was copied.
    Suppressed { until: u64 },
}

pub struct BackupManager {
    target: PathBuf,
    file_name: String,
    backup_dir: PathBuf,
    records: VecDeque<BackupRecord>,
    cooldown_until: u64,
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub fn new(target: impl Into<PathBuf>, backup_root: &Path) -> Self {
        Self::with_clock(target, backup_root, Arc::new(SystemClock))
    }

    /// Create a manager for `target` and load whatever history already exists
    /// under `backup_root`.
    pub fn with_clock(target: impl Into<PathBuf>, backup_root: &Path, clock: Arc<dyn Clock>) -> Self {
        let target = target.into();
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let backup_dir = backup_root.join(&file_name);
        let records = load_records(&backup_dir);

        tracing::debug!(
            "Loaded {} existing backup(s) for '{}' from {}",
            records.len(),
            file_name,
            backup_dir.display()
        );

        Self {
            target,
            file_name,
            backup_dir,
            records,
            cooldown_until: 0,
            clock,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn cooldown_until(&self) -> u64 {
        self.cooldown_until
    }

    /// Timestamps of the retained snapshots, oldest first.
    pub fn timestamps(&self) -> Vec<u64> {
        self.records.iter().map(|record| record.timestamp).collect()
    }

    /// Snapshot the live file under `timestamp` unless the cooldown is active.
    pub fn make_backup(&mut self, timestamp: u64, settings: &Settings) -> Result<BackupOutcome, BackupError> {
        if timestamp <= self.cooldown_until {
            return Ok(BackupOutcome::Suppressed {
                until: self.cooldown_until,
            });
        }

        let destination = self.backup_dir.join(timestamp.to_string());
        fs::create_dir_all(&self.backup_dir)
            .and_then(|_| fs::copy(&self.target, &destination))
            .map_err(|source| BackupError::Copy {
                from: self.target.clone(),
                to: destination.clone(),
                source,
            })?;

        self.insert(BackupRecord {
            path: destination,
            timestamp,
        });
        let evicted = self.rotate(settings.max_backup_file_count.max(1));
        self.cooldown_until = self
            .clock
            .now_millis()
            .saturating_add(settings.backup_block_time_after_backup_ms);

        Ok(BackupOutcome::Created { timestamp, evicted })
    }

    /// Copy the snapshot stored under `timestamp` over the live file.
    ///
    /// The record list is left untouched whatever happens.
    pub fn restore_backup(&mut self, timestamp: u64, settings: &Settings) -> Result<(), BackupError> {
        let record = self
            .records
            .iter()
            .find(|record| record.timestamp == timestamp)
            .ok_or_else(|| BackupError::NotFound {
                file: self.file_name.clone(),
                timestamp,
            })?;

        fs::copy(&record.path, &self.target).map_err(|source| BackupError::Copy {
            from: record.path.clone(),
            to: self.target.clone(),
            source,
        })?;

        self.cooldown_until = self
            .clock
            .now_millis()
            .saturating_add(settings.backup_block_time_after_restore_ms);
        Ok(())
    }

    fn insert(&mut self, record: BackupRecord) {
        // Same millisecond: the copy already overwrote the file, keep one record.
        match self
            .records
            .binary_search_by_key(&record.timestamp, |existing| existing.timestamp)
        {
            Ok(index) => self.records[index] = record,
            Err(index) => self.records.insert(index, record),
        }
    }

    fn rotate(&mut self, max: usize) -> Vec<u64> {
        let mut evicted = Vec::new();
        while self.records.len() > max {
            let Some(oldest) = self.records.pop_front() else {
                break;
            };
            if let Err(err) = fs::remove_file(&oldest.path) {
                tracing::warn!(
                    "Could not delete old backup {}: {}",
                    oldest.path.display(),
                    err
                );
            }
            evicted.push(oldest.timestamp);
        }
        evicted
    }
}

fn load_records(backup_dir: &Path) -> VecDeque<BackupRecord> {
    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(_) => return VecDeque::new(),
    };

    let mut records: Vec<BackupRecord> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let timestamp = entry.file_name().to_str()?.parse::<u64>().ok()?;
            Some(BackupRecord {
                path: entry.path(),
                timestamp,
            })
        })
        .collect();
    records.sort_by_key(|record| record.timestamp);
    records.into()
}
