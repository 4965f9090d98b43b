//! Routes file events and restore requests to per-file backup managers.
//!
//! The coordinator owns every [`BackupManager`] and is the only task that
//! touches them. File events always win over restore requests: when both
//! queues hold something, the pending file event is handled first.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupManager, BackupOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::BackupError;
use crate::feedback::{Cue, Feedback, Silent};
use crate::filter::Blacklist;
use crate::{format_timestamp, BackupRequest, BackupSnapshot, FileEvent, FileEventKind, Outcome};

/// How long to sleep when both input queues are empty.
pub const COORDINATOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct BackupCoordinator {
    watch_dir: PathBuf,
    backup_root: PathBuf,
    settings: Settings,
    blacklist: Blacklist,
    managers: BTreeMap<String, BackupManager>,
    clock: Arc<dyn Clock>,
    feedback: Box<dyn Feedback>,
    snapshots: watch::Sender<BackupSnapshot>,
    last_outcome: Option<Outcome>,
}

impl BackupCoordinator {
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        settings: Settings,
        blacklist: Blacklist,
        snapshots: watch::Sender<BackupSnapshot>,
    ) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            backup_root: backup_root.into(),
            settings,
            blacklist,
            managers: BTreeMap::new(),
            clock: Arc::new(SystemClock),
            feedback: Box::new(Silent),
            snapshots,
            last_outcome: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn has_manager(&self, file_name: &str) -> bool {
        self.managers.contains_key(file_name)
    }

    pub fn manager(&self, file_name: &str) -> Option<&BackupManager> {
        self.managers.get(file_name)
    }

    /// Create managers for every non-blacklisted regular file already in the
    /// watched directory, then publish the initial snapshot.
    pub fn start(&mut self) {
        match fs::read_dir(&self.watch_dir) {
            Ok(entries) => {
                for entry in entries.filter_map(|entry| entry.ok()) {
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if !is_file {
                        continue;
                    }
                    let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                        continue;
                    };
                    if self.blacklist.is_blacklisted(&name) {
                        continue;
                    }
                    self.manager_for(&name);
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Could not list watched directory {}: {}",
                    self.watch_dir.display(),
                    err
                );
            }
        }

        tracing::info!("Backup management started with {} file(s)", self.managers.len());
        self.publish();
    }

    /// Back up the file an event refers to. Returns whether anything was
    /// handed to a manager.
    pub fn handle_file_event(&mut self, event: FileEvent) -> bool {
        let Some(name) = event.file_name().map(str::to_string) else {
            return false;
        };
        if self.blacklist.is_blacklisted(&name) {
            tracing::debug!("Ignoring blacklisted file '{}'", name);
            return false;
        }

        let timestamp = self.clock.now_millis();
        tracing::info!(
            "File changed: '{}' {:?} at {}",
            name,
            event.kind,
            format_timestamp(timestamp)
        );
        if event.kind == FileEventKind::Deleted {
            return false;
        }
        if event.path.is_dir() {
            tracing::debug!("Ignoring directory '{}'", name);
            return false;
        }

        let settings = self.settings.clone();
        let result = self.manager_for(&name).make_backup(timestamp, &settings);
        match result {
            Ok(BackupOutcome::Created { timestamp, evicted }) => {
                if !evicted.is_empty() {
                    tracing::debug!("Rotated out {} old backup(s) of '{}'", evicted.len(), name);
                }
                self.report(Outcome::BackupCreated { file: name, timestamp }, Cue::Saved);
            }
            Ok(BackupOutcome::Suppressed { until }) => {
                tracing::debug!(
                    "Backup of '{}' suppressed until {}",
                    name,
                    format_timestamp(until)
                );
            }
            Err(err) => {
                tracing::warn!("Could not create backup: {}", err);
                let reason = err.to_string();
                self.report(Outcome::BackupFailed { file: name, reason }, Cue::Failed);
            }
        }
        self.publish();
        true
    }

    /// Restore the requested snapshot. Unknown files are not given a manager.
    pub fn handle_restore_request(&mut self, request: BackupRequest) -> Result<(), BackupError> {
        let BackupRequest {
            target_file_name: file,
            backup_timestamp: timestamp,
        } = request;
        tracing::info!("Restore requested: '{}' to {}", file, format_timestamp(timestamp));

        let result = match self.managers.get_mut(&file) {
            Some(manager) => manager.restore_backup(timestamp, &self.settings),
            None => Err(BackupError::UnknownFile { file: file.clone() }),
        };

        match &result {
            Ok(()) => {
                self.report(Outcome::Restored { file, timestamp }, Cue::Restored);
            }
            Err(err) => {
                tracing::warn!("Restore failed: {}", err);
                let reason = err.to_string();
                self.report(Outcome::RestoreFailed { file, timestamp, reason }, Cue::Failed);
            }
        }
        self.publish();
        result
    }

    pub fn snapshot(&self) -> BackupSnapshot {
        BackupSnapshot {
            files: self
                .managers
                .iter()
                .map(|(name, manager)| (name.clone(), manager.timestamps()))
                .collect(),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Process queues until `shutdown` is cancelled.
    pub async fn run(
        mut self,
        mut file_events: mpsc::Receiver<FileEvent>,
        mut restore_requests: mpsc::Receiver<BackupRequest>,
        shutdown: CancellationToken,
    ) {
        self.start();

        while !shutdown.is_cancelled() {
            match file_events.try_recv() {
                Ok(event) => {
                    self.handle_file_event(event);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            match restore_requests.try_recv() {
                Ok(request) => {
                    let _ = self.handle_restore_request(request);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(COORDINATOR_POLL_INTERVAL) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("Backup management stopped");
    }

    fn manager_for(&mut self, name: &str) -> &mut BackupManager {
        let Self {
            managers,
            watch_dir,
            backup_root,
            clock,
            ..
        } = self;
        managers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!("Managing backups for '{}'", name);
            BackupManager::with_clock(watch_dir.join(name), backup_root, clock.clone())
        })
    }

    fn report(&mut self, outcome: Outcome, cue: Cue) {
        self.feedback.cue(cue);
        self.last_outcome = Some(outcome);
    }

    fn publish(&self) {
        // Latest wins: an unread snapshot is simply replaced.
        self.snapshots.send_replace(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Cue>>>);

    impl Feedback for Recorder {
        fn cue(&self, cue: Cue) {
            self.0.lock().unwrap().push(cue);
        }
    }

    struct Fixture {
        _dir: TempDir,
        watch_dir: PathBuf,
        clock: ManualClock,
        cues: Recorder,
        snapshots: watch::Receiver<BackupSnapshot>,
        coordinator: BackupCoordinator,
    }

    fn fixture(files: &[(&str, &str)], settings: Settings) -> Fixture {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let watch_dir = dir.path().join("saves");
        fs::create_dir(&watch_dir).unwrap();
        for (name, content) in files {
            fs::write(watch_dir.join(name), content).unwrap();
        }
        fs::create_dir(watch_dir.join("subdir")).unwrap();

        let clock = ManualClock::new(10_000);
        let cues = Recorder::default();
        let (tx, snapshots) = watch::channel(BackupSnapshot::default());
        let coordinator = BackupCoordinator::new(
            &watch_dir,
            dir.path().join("backup-data"),
            settings,
            Blacklist::parse(r".*\.bak"),
            tx,
        )
        .with_clock(Arc::new(clock.clone()))
        .with_feedback(Box::new(cues.clone()));

        Fixture {
            _dir: dir,
            watch_dir,
            clock,
            cues,
            snapshots,
            coordinator,
        }
    }

    fn settings(max: usize) -> Settings {
        Settings {
            play_sounds: false,
            max_backup_file_count: max,
            backup_block_time_after_backup_ms: 2000,
            backup_block_time_after_restore_ms: 2000,
        }
    }

    #[test]
    fn test_start_scans_regular_non_blacklisted_files() {
        let mut fx = fixture(&[("a.sav", "a"), ("b.sav", "b"), ("a.sav.bak", "old")], settings(5));
        fx.coordinator.start();

        let snapshot = fx.snapshots.borrow().clone();
        let names: Vec<&str> = snapshot.files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a.sav", "b.sav"]);
        assert!(!fx.coordinator.has_manager("subdir"));
        assert!(snapshot.last_outcome.is_none());
    }

    #[test]
    fn test_modified_event_creates_backup_and_publishes() {
        let mut fx = fixture(&[("a.sav", "a")], settings(5));
        fx.coordinator.start();

        let handled = fx
            .coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));

        assert!(handled);
        let snapshot = fx.snapshots.borrow().clone();
        assert_eq!(snapshot.timestamps("a.sav"), &[10_000]);
        assert_eq!(
            snapshot.last_outcome,
            Some(Outcome::BackupCreated { file: "a.sav".into(), timestamp: 10_000 })
        );
        assert_eq!(*fx.cues.0.lock().unwrap(), vec![Cue::Saved]);
    }

    #[test]
    fn test_burst_of_events_yields_one_backup() {
        let mut fx = fixture(&[("a.sav", "a")], settings(5));
        fx.coordinator.start();

        for _ in 0..5 {
            fx.coordinator
                .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));
            fx.clock.advance(10);
        }

        assert_eq!(fx.snapshots.borrow().timestamps("a.sav").len(), 1);
        assert_eq!(fx.cues.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_created_event_for_new_file_gets_manager() {
        let mut fx = fixture(&[], settings(5));
        fx.coordinator.start();
        fs::write(fx.watch_dir.join("new.sav"), "fresh").unwrap();

        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("new.sav"), FileEventKind::Created));

        assert!(fx.coordinator.has_manager("new.sav"));
        assert_eq!(fx.snapshots.borrow().timestamps("new.sav").len(), 1);
    }

    #[test]
    fn test_blacklisted_file_never_gets_manager() {
        let mut fx = fixture(&[("x.bak", "junk")], settings(5));
        fx.coordinator.start();

        for kind in [FileEventKind::Created, FileEventKind::Modified, FileEventKind::Modified] {
            fx.clock.advance(5000);
            let handled = fx
                .coordinator
                .handle_file_event(FileEvent::new(fx.watch_dir.join("x.bak"), kind));
            assert!(!handled);
        }

        assert!(!fx.coordinator.has_manager("x.bak"));
        assert!(fx.snapshots.borrow().files.is_empty());
        assert!(fx.cues.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_deleted_event_is_ignored() {
        let mut fx = fixture(&[], settings(5));
        fx.coordinator.start();

        let handled = fx
            .coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("gone.sav"), FileEventKind::Deleted));

        assert!(!handled);
        assert!(!fx.coordinator.has_manager("gone.sav"));
    }

    #[test]
    fn test_delete_then_create_are_independent() {
        let mut fx = fixture(&[("a.sav", "old")], settings(5));
        fx.coordinator.start();

        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Deleted));
        fs::write(fx.watch_dir.join("a.sav"), "new").unwrap();
        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Created));

        let manager = fx.coordinator.manager("a.sav").unwrap();
        assert_eq!(manager.timestamps(), vec![10_000]);
        let stored = manager.backup_dir().join("10000");
        assert_eq!(fs::read_to_string(stored).unwrap(), "new");
    }

    #[test]
    fn test_restore_round_trip() {
        let mut fx = fixture(&[("a.sav", "good")], settings(5));
        fx.coordinator.start();
        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));
        fs::write(fx.watch_dir.join("a.sav"), "broken").unwrap();

        fx.coordinator
            .handle_restore_request(BackupRequest::new("a.sav", 10_000))
            .expect("restore should succeed");

        assert_eq!(fs::read_to_string(fx.watch_dir.join("a.sav")).unwrap(), "good");
        assert_eq!(
            fx.snapshots.borrow().last_outcome,
            Some(Outcome::Restored { file: "a.sav".into(), timestamp: 10_000 })
        );
        assert_eq!(*fx.cues.0.lock().unwrap(), vec![Cue::Saved, Cue::Restored]);
    }

    #[test]
    fn test_restore_write_event_is_suppressed() {
        let mut fx = fixture(&[("a.sav", "good")], settings(5));
        fx.coordinator.start();
        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));

        fx.clock.advance(60_000);
        fx.coordinator
            .handle_restore_request(BackupRequest::new("a.sav", 10_000))
            .unwrap();
        fx.clock.advance(100);
        fx.coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));

        assert_eq!(fx.snapshots.borrow().timestamps("a.sav"), &[10_000]);
    }

    #[test]
    fn test_restore_for_unknown_file_or_timestamp() {
        let mut fx = fixture(&[("a.sav", "keep")], settings(5));
        fx.coordinator.start();

        let err = fx
            .coordinator
            .handle_restore_request(BackupRequest::new("ghost.sav", 1))
            .unwrap_err();
        assert!(matches!(err, BackupError::UnknownFile { .. }));
        assert!(!fx.coordinator.has_manager("ghost.sav"));

        let err = fx
            .coordinator
            .handle_restore_request(BackupRequest::new("a.sav", 1))
            .unwrap_err();
        assert!(matches!(err, BackupError::NotFound { .. }));
        assert_eq!(fs::read_to_string(fx.watch_dir.join("a.sav")).unwrap(), "keep");
        assert!(fx.snapshots.borrow().last_outcome.as_ref().unwrap().is_failure());
        assert_eq!(*fx.cues.0.lock().unwrap(), vec![Cue::Failed, Cue::Failed]);
    }

    #[test]
    fn test_unread_snapshots_are_replaced_by_the_latest() {
        let quick = Settings {
            backup_block_time_after_backup_ms: 0,
            ..settings(50)
        };
        let mut fx = fixture(&[("a.sav", "a")], quick);
        fx.coordinator.start();
        fx.snapshots.borrow_and_update();

        for _ in 0..20 {
            fx.clock.advance(1);
            assert!(fx
                .coordinator
                .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified)));
        }

        assert!(fx.snapshots.has_changed().unwrap());
        let latest = fx.snapshots.borrow_and_update().clone();
        assert_eq!(latest, fx.coordinator.snapshot());
        assert_eq!(latest.timestamps("a.sav").len(), 20);
        assert_eq!(latest.timestamps("a.sav").last(), Some(&10_020));
        assert!(!fx.snapshots.has_changed().unwrap());
    }

    #[test]
    fn test_directory_events_are_ignored() {
        let mut fx = fixture(&[], settings(5));
        fx.coordinator.start();
        fs::create_dir(fx.watch_dir.join("profile2")).unwrap();

        let handled = fx
            .coordinator
            .handle_file_event(FileEvent::new(fx.watch_dir.join("profile2"), FileEventKind::Created));

        assert!(!handled);
        assert!(!fx.coordinator.has_manager("profile2"));
        assert!(fx.snapshots.borrow().files.is_empty());
        assert!(fx.cues.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rotation_through_coordinator() {
        let mut fx = fixture(&[("a.sav", "a")], settings(3));
        fx.coordinator.start();

        let mut accepted = Vec::new();
        for _ in 0..4 {
            accepted.push(fx.clock.now_millis());
            fx.coordinator
                .handle_file_event(FileEvent::new(fx.watch_dir.join("a.sav"), FileEventKind::Modified));
            fx.clock.advance(2001);
        }

        assert_eq!(fx.snapshots.borrow().timestamps("a.sav"), &accepted[1..]);
    }
}
