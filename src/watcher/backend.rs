//! Directory watch backends.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::WatchError;

/// Capacity of the raw event channel between a backend and the watcher loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One raw notification, or an error surfaced by the backend.
pub type RawEvent = Result<FsEvent, WatchError>;

/// Operation reported by a raw notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// File created, or renamed into place.
    Create,
    /// File content changed.
    Write,
    /// File removed.
    Remove,
    /// File renamed away.
    Rename,
    /// Permissions or timestamps changed.
    Metadata,
    /// Anything else (access, unknown).
    Other,
}

impl FsEventKind {
    /// Whether this operation may have changed file content.
    pub fn is_content_change(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }
}

/// A platform-independent change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub paths: Vec<PathBuf>,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            paths: vec![path.into()],
        }
    }
}

impl From<notify::Event> for FsEvent {
    fn from(event: notify::Event) -> Self {
        let mut paths = event.paths;
        let kind = match event.kind {
            EventKind::Create(_) => FsEventKind::Create,
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => FsEventKind::Write,
            EventKind::Modify(ModifyKind::Metadata(_)) => FsEventKind::Metadata,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // [from, to]: only the destination gains new content.
                if paths.len() > 1 {
                    paths.drain(..paths.len() - 1);
                }
                FsEventKind::Create
            }
            EventKind::Modify(ModifyKind::Name(_)) => FsEventKind::Rename,
            EventKind::Remove(_) => FsEventKind::Remove,
            _ => FsEventKind::Other,
        };
        Self { kind, paths }
    }
}

/// "Watch this directory, deliver change events for paths under it."
///
/// Events are delivered on the channel handed out when the backend is
/// constructed, not through this trait.
pub trait WatchBackend: Send {
    /// Start watching `dir` (non-recursively).
    fn watch_dir(&mut self, dir: &Path) -> Result<(), WatchError>;

    /// Release every watch handle.
    fn unwatch_all(&mut self) -> Result<(), WatchError>;
}

/// [`WatchBackend`] using the platform's recommended `notify` watcher
/// (inotify, FSEvents, ReadDirectoryChangesW).
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    dirs: Vec<PathBuf>,
}

impl NotifyBackend {
    /// Create the OS watch handle and the channel its events arrive on.
    pub fn new() -> Result<(Self, mpsc::Receiver<RawEvent>), WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Runs on notify's own thread; never block it.
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let raw = res.map(FsEvent::from).map_err(WatchError::from);
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(raw) {
                tracing::warn!("File watcher event channel full, raw event dropped");
            }
        })?;

        Ok((
            Self {
                watcher,
                dirs: Vec::new(),
            },
            rx,
        ))
    }
}

impl WatchBackend for NotifyBackend {
    fn watch_dir(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        self.dirs.push(dir.to_path_buf());
        Ok(())
    }

    fn unwatch_all(&mut self) -> Result<(), WatchError> {
        let mut first_err = None;
        for dir in self.dirs.drain(..) {
            if let Err(e) = self.watcher.unwatch(&dir) {
                tracing::debug!(dir = %dir.display(), error = %e, "Unwatch failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyBackend")
            .field("dirs", &self.dirs)
            .finish_non_exhaustive()
    }
}
