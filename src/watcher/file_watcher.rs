//! Watcher event loop: filtering and per-path debounce.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backend::{NotifyBackend, RawEvent, WatchBackend};
use super::debounce::{Callback, Debouncer};
use super::WatchError;

/// Default debounce window (500 milliseconds).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches individual files and reports debounced content changes.
///
/// OS notification APIs observe directories, so [`watch_file`](Self::watch_file)
/// watches the file's parent and [`run`](Self::run) filters events back down
/// to the requested paths.
pub struct FileWatcher {
    backend: Box<dyn WatchBackend>,
    events: mpsc::Receiver<RawEvent>,
    debouncer: Debouncer,
    watched_dirs: HashSet<PathBuf>,
    watched_files: HashSet<PathBuf>,
}

impl FileWatcher {
    /// Create a watcher backed by the platform's native notifications.
    ///
    /// # Errors
    /// Returns `WatchError::Notify` if the OS watch handle cannot be created.
    pub fn new(debounce: Duration) -> Result<Self, WatchError> {
        let (backend, events) = NotifyBackend::new()?;
        Ok(Self::with_backend(backend, events, debounce))
    }

    /// Create a watcher on top of an arbitrary backend and its event stream.
    pub fn with_backend(
        backend: impl WatchBackend + 'static,
        events: mpsc::Receiver<RawEvent>,
        debounce: Duration,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            events,
            debouncer: Debouncer::new(debounce),
            watched_dirs: HashSet::new(),
            watched_files: HashSet::new(),
        }
    }

    /// Quiet period after the last event before a callback fires.
    pub fn debounce(&self) -> Duration {
        self.debouncer.window()
    }

    /// Register interest in `path` by watching its parent directory.
    ///
    /// Directories shared by several files are watched once.
    pub fn watch_file(&mut self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = resolve(path.as_ref());
        let dir = path
            .parent()
            .ok_or_else(|| WatchError::NoParent(path.clone()))?
            .to_path_buf();

        if !self.watched_dirs.contains(&dir) {
            self.backend.watch_dir(&dir)?;
            tracing::debug!(dir = %dir.display(), "Watching directory");
            self.watched_dirs.insert(dir);
        }
        self.watched_files.insert(path);
        Ok(())
    }

    /// Files registered through [`watch_file`](Self::watch_file).
    pub fn watched_files(&self) -> impl Iterator<Item = &Path> {
        self.watched_files.iter().map(PathBuf::as_path)
    }

    /// Number of debounce timers currently pending.
    pub fn pending(&self) -> usize {
        self.debouncer.pending_count()
    }

    /// Process raw events until `cancel` fires or the backend stream ends.
    ///
    /// Only create and write events on one of `watched_paths` count; each
    /// such path gets its own debounce window, after which `on_change` is
    /// called. Backend errors are logged and the loop keeps going.
    ///
    /// Pending debounce timers survive the return of this method; call
    /// [`close`](Self::close) to cancel them.
    pub async fn run<P, F>(&mut self, cancel: CancellationToken, watched_paths: &[P], on_change: F)
    where
        P: AsRef<Path>,
        F: Fn() + Send + Sync + 'static,
    {
        let watched: HashSet<PathBuf> = watched_paths
            .iter()
            .map(|p| resolve(p.as_ref()))
            .collect();
        let on_change: Callback = Arc::new(on_change);

        tracing::debug!(files = watched.len(), debounce = ?self.debounce(), "File watcher running");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("File watcher cancelled");
                    break;
                }

                raw = self.events.recv() => match raw {
                    Some(Ok(event)) => {
                        if !event.kind.is_content_change() {
                            continue;
                        }
                        for path in event.paths {
                            let path = resolve(&path);
                            if !watched.contains(&path) {
                                continue;
                            }
                            tracing::debug!(path = %path.display(), kind = ?event.kind, "Change detected");
                            self.debouncer.schedule(path, Arc::clone(&on_change));
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "File watcher error");
                    }
                    None => {
                        tracing::debug!("File watcher event stream closed");
                        break;
                    }
                },
            }
        }
    }

    /// Cancel pending debounce timers and release the backend's watch handles.
    pub fn close(mut self) -> Result<(), WatchError> {
        self.debouncer.cancel_all();
        self.watched_dirs.clear();
        self.backend.unwatch_all()
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("debounce", &self.debounce())
            .field("watched_dirs", &self.watched_dirs)
            .field("watched_files", &self.watched_files)
            .finish_non_exhaustive()
    }
}

/// Absolute form of `path` with its parent directory canonicalized, so a
/// watched path and the path a backend reports compare equal even through
/// symlinked directories. The file itself need not exist.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(dir), Some(name)) => match dir.canonicalize() {
            Ok(dir) => dir.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}
