use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use crate::error::WatchError;
use crate::{FileEvent, FileEventKind};

/// How long to sleep when no native notification is pending.
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Watches a single directory (not recursively) and turns native
/// notifications into [`FileEvent`]s.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    raw_rx: Receiver<notify::Result<Event>>,
    pending: VecDeque<FileEvent>,
    path: PathBuf,
}

impl DirectoryWatcher {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, WatchError> {
        let path = path.as_ref().to_path_buf();
        let (tx, raw_rx) = mpsc::channel::<notify::Result<Event>>();

        let init_error = |source| WatchError::Init {
            path: path.clone(),
            source,
        };

        let mut watcher = notify::recommended_watcher(tx).map_err(init_error)?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(init_error)?;

        Ok(Self {
            _watcher: watcher,
            raw_rx,
            pending: VecDeque::new(),
            path,
        })
    }

    /// Next already-available event, without waiting.
    pub fn try_next(&mut self) -> Option<FileEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.raw_rx.try_recv() {
                Ok(Ok(event)) => self.pending.extend(map_event(&event)),
                Ok(Err(err)) => {
                    tracing::error!("File watcher error: {}", err);
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next event, polling every [`WATCH_POLL_INTERVAL`].
    pub async fn next(&mut self) -> FileEvent {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            tokio::time::sleep(WATCH_POLL_INTERVAL).await;
        }
    }

    /// Forward events into `events` until `shutdown` is cancelled or the
    /// receiving side goes away. A full queue does not delay shutdown.
    pub async fn run(mut self, events: Sender<FileEvent>, shutdown: CancellationToken) {
        tracing::info!("File watcher started on {}", self.path.display());

        while !shutdown.is_cancelled() {
            let event = tokio::select! {
                event = self.next() => event,
                _ = shutdown.cancelled() => break,
            };
            tracing::debug!("Watcher saw {:?} {}", event.kind, event.path.display());

            let sent = tokio::select! {
                sent = events.send(event) => sent,
                _ = shutdown.cancelled() => break,
            };
            if sent.is_err() {
                break;
            }
        }

        tracing::info!("File watcher stopped");
    }
}

/// Establish the watch on `path` and run it. An initialization failure is
/// logged and ends this task only.
pub async fn watch_directory(
    path: PathBuf,
    events: Sender<FileEvent>,
    shutdown: CancellationToken,
) -> Result<(), WatchError> {
    let watcher = DirectoryWatcher::new(&path).map_err(|err| {
        tracing::error!("{}", err);
        err
    })?;
    watcher.run(events, shutdown).await;
    Ok(())
}

/// Map one native notification to zero or more file events, one per path.
pub fn map_event(event: &Event) -> Vec<FileEvent> {
    let single = |kind: FileEventKind| -> Vec<FileEvent> {
        event
            .paths
            .iter()
            .map(|path| FileEvent::new(path.clone(), kind))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => single(FileEventKind::Created),
        EventKind::Remove(_) => single(FileEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(FileEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            FileEvent::new(event.paths[0].clone(), FileEventKind::Deleted),
            FileEvent::new(event.paths[1].clone(), FileEventKind::Created),
        ],
        EventKind::Modify(_) => single(FileEventKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
