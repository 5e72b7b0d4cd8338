//! Per-path trailing-edge debounce.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

type PendingMap = HashMap<PathBuf, PendingFire>;

struct PendingFire {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Keeps at most one pending timer per path. Scheduling a path that already
/// has a pending timer aborts it and starts a fresh window.
pub(crate) struct Debouncer {
    window: Duration,
    pending: Arc<Mutex<PendingMap>>,
    generation: AtomicU64,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    /// Fire `callback` once `window` has passed with no further call for `path`.
    pub(crate) fn schedule(&self, path: PathBuf, callback: Callback) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = lock(&self.pending);

        if let Some(previous) = pending.remove(&path) {
            previous.handle.abort();
        }

        let map = Arc::clone(&self.pending);
        let key = path.clone();
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                // A superseding schedule may have raced the wake-up.
                let mut pending = lock(&map);
                match pending.get(&key) {
                    Some(current) if current.generation == generation => {
                        pending.remove(&key);
                    }
                    _ => return,
                }
            }
            tracing::debug!(path = %key.display(), "Debounce window elapsed");
            callback();
        });

        pending.insert(path, PendingFire { generation, handle });
    }

    /// Abort every pending timer.
    pub(crate) fn cancel_all(&self) {
        let mut pending = lock(&self.pending);
        let count = pending.len();
        for (_, fire) in pending.drain() {
            fire.handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "Cancelled pending debounce timers");
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn lock(map: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}
