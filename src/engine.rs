//! Wires the watcher and coordinator together and owns their shutdown order.

use std::path::PathBuf;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::coordinator::BackupCoordinator;
use crate::config::Settings;
use crate::error::SubmitError;
use crate::feedback::{self, Feedback};
use crate::filter::Blacklist;
use crate::watcher::watch_directory;
use crate::{BackupRequest, BackupSnapshot, FileEvent, TerminationSignal};

pub const FILE_EVENT_QUEUE_CAPACITY: usize = 10;
pub const RESTORE_QUEUE_CAPACITY: usize = 1;
pub const TERMINATION_QUEUE_CAPACITY: usize = 1;

pub struct EngineOptions {
    pub watch_dir: PathBuf,
    pub backup_root: PathBuf,
    pub blacklist: Blacklist,
    pub settings: Settings,
    pub feedback: Option<Box<dyn Feedback>>,
}

/// What the presentation layer gets to talk to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    restore_tx: mpsc::Sender<BackupRequest>,
    termination_tx: mpsc::Sender<TerminationSignal>,
    snapshots: watch::Receiver<BackupSnapshot>,
}

impl EngineHandle {
    /// Latest published state. Use `borrow_and_update` / `has_changed` to
    /// consume only new snapshots.
    pub fn snapshots(&self) -> watch::Receiver<BackupSnapshot> {
        self.snapshots.clone()
    }

    /// Queue a restore. Refused while another request is still waiting.
    pub fn request_restore(&self, file: impl Into<String>, timestamp: u64) -> Result<(), SubmitError> {
        self.restore_tx
            .try_send(BackupRequest::new(file, timestamp))
            .map_err(|err| match err {
                TrySendError::Full(_) => SubmitError::Busy,
                TrySendError::Closed(_) => SubmitError::Closed,
            })
    }

    /// Begin orderly shutdown. Extra calls are ignored.
    pub fn request_termination(&self) {
        let _ = self.termination_tx.try_send(TerminationSignal);
    }
}

pub struct Engine {
    options: EngineOptions,
    restore_rx: mpsc::Receiver<BackupRequest>,
    termination_rx: mpsc::Receiver<TerminationSignal>,
    snapshot_tx: watch::Sender<BackupSnapshot>,
}

impl Engine {
    /// Build the queues. Nothing runs until [`Engine::run`] is awaited.
    pub fn new(options: EngineOptions) -> (Self, EngineHandle) {
        let (restore_tx, restore_rx) = mpsc::channel(RESTORE_QUEUE_CAPACITY);
        let (termination_tx, termination_rx) = mpsc::channel(TERMINATION_QUEUE_CAPACITY);
        let (snapshot_tx, snapshots) = watch::channel(BackupSnapshot::default());

        let engine = Self {
            options,
            restore_rx,
            termination_rx,
            snapshot_tx,
        };
        let handle = EngineHandle {
            restore_tx,
            termination_tx,
            snapshots,
        };
        (engine, handle)
    }

    /// Run until a termination signal arrives (or every handle is dropped),
    /// then stop the watcher, then the coordinator.
    pub async fn run(self) {
        let Engine {
            options,
            restore_rx,
            mut termination_rx,
            snapshot_tx,
        } = self;

        let (file_tx, file_rx) = mpsc::channel::<FileEvent>(FILE_EVENT_QUEUE_CAPACITY);
        let stop_watcher = CancellationToken::new();
        let stop_coordinator = CancellationToken::new();

        let feedback = options
            .feedback
            .unwrap_or_else(|| feedback::from_settings(options.settings.play_sounds));
        let coordinator = BackupCoordinator::new(
            options.watch_dir.clone(),
            options.backup_root,
            options.settings,
            options.blacklist,
            snapshot_tx,
        )
        .with_feedback(feedback);

        tracing::info!("Launching file watcher job");
        let watcher_job = tokio::spawn(watch_directory(options.watch_dir, file_tx, stop_watcher.clone()));
        tracing::info!("Launching backup management job");
        let coordinator_job = tokio::spawn(coordinator.run(file_rx, restore_rx, stop_coordinator.clone()));

        tracing::info!("Waiting for termination signal");
        termination_rx.recv().await;
        tracing::info!("Termination signal received");

        tracing::info!("Stopping file watcher job");
        stop_watcher.cancel();
        match watcher_job.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("File watcher had ended early: {}", err),
            Err(err) => tracing::error!("File watcher job panicked: {}", err),
        }

        tracing::info!("Stopping backup management job");
        stop_coordinator.cancel();
        if let Err(err) = coordinator_job.await {
            tracing::error!("Backup management job panicked: {}", err);
        }

        tracing::info!("All jobs stopped");
    }
}
