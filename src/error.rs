use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The directory watch could not be established.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch directory {}: {source}", .path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Failures of a single backup or restore. None of these are fatal.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("could not copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no backup of '{file}' with timestamp {timestamp}")]
    NotFound { file: String, timestamp: u64 },

    #[error("no backup manager for file '{file}'")]
    UnknownFile { file: String },
}

impl BackupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound { .. } | BackupError::UnknownFile { .. })
    }
}

/// Why a request could not be handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a restore request is already pending")]
    Busy,
    #[error("the backup engine has shut down")]
    Closed,
}
