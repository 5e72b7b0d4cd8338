//! Collector registry for managing collector lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::collector::runtime::{CollectionTrigger, CollectorRuntime, CollectorState, RunStats};
use crate::collector::{Collector, MAX_INTERVAL, MIN_INTERVAL, interval_in_bounds};
use crate::model::CollectorStateEvent;
use crate::topics;
use crate::watcher::{DEFAULT_DEBOUNCE, FileWatcher};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown collector: {0}")]
    UnknownCollector(String),

    #[error("collector already registered: {0}")]
    AlreadyRegistered(String),

    #[error("cannot disable {0} collector (always required)")]
    RequiredCollector(String),

    #[error(
        "invalid interval {} for {name}: must be between {} and {}",
        human(.interval),
        human(&MIN_INTERVAL),
        human(&MAX_INTERVAL)
    )]
    InvalidInterval { name: String, interval: Duration },
}

fn human(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

/// Registry-wide settings.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Start a file watcher for collectors that declare watched files.
    pub watch_files: bool,
    /// Debounce window for those watchers.
    pub debounce: Duration,
    /// How long `disable` and `update_interval` wait for a collector loop
    /// to exit before aborting it.
    pub stop_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            watch_files: true,
            debounce: DEFAULT_DEBOUNCE,
            stop_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Snapshot of one collector's configuration and run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub enabled: bool,
    pub required: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub state: CollectorState,
    pub watching: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub panic_count: u64,
    pub last_error: Option<String>,
}

struct ManagedCollector {
    collector: Arc<dyn Collector>,
    interval: Duration,
    enabled: bool,
    required: bool,
    stats: Arc<RunStats>,
    running: Option<RunningCollector>,
}

impl ManagedCollector {
    fn status(&self, name: &str) -> CollectorStatus {
        let snap = self.stats.snapshot();
        CollectorStatus {
            name: name.to_string(),
            enabled: self.enabled,
            required: self.required,
            interval: self.interval,
            state: snap.state,
            watching: self.running.as_ref().is_some_and(|r| r.watcher.is_some()),
            last_run: snap.last_run,
            run_count: snap.runs,
            error_count: snap.errors,
            panic_count: snap.panics,
            last_error: snap.last_error,
        }
    }
}

struct RunningCollector {
    cancel: CancellationToken,
    trigger: CollectionTrigger,
    task: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
}

impl RunningCollector {
    /// Cancel and wait up to `timeout` for the loop and its watcher to exit.
    ///
    /// An in-progress collection is allowed to finish within the timeout.
    /// Past it the loop task is aborted; a hung `collect()` is left detached.
    /// Returns `false` if anything had to be aborted.
    async fn stop(mut self, name: &str, timeout: Duration) -> bool {
        self.cancel.cancel();
        let mut clean = join_or_abort(name, "Collector", &mut self.task, timeout).await;
        if let Some(mut watcher) = self.watcher.take() {
            clean &= join_or_abort(name, "Watcher", &mut watcher, timeout).await;
        }
        clean
    }
}

async fn join_or_abort(name: &str, what: &str, task: &mut JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut *task).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(collector = %name, error = %e, "{what} task ended abnormally");
            true
        }
        Err(_) => {
            tracing::warn!(collector = %name, timeout = ?timeout, "{what} task did not stop in time, aborting");
            task.abort();
            false
        }
    }
}

/// Registry for managing multiple collector tasks.
///
/// Each enabled collector runs in its own [`CollectorRuntime`] task under a
/// child of the registry's cancellation token. Collectors that declare
/// watched files also get a [`FileWatcher`] task feeding the runtime's
/// trigger lane; if the watcher cannot be set up the collector still runs on
/// its interval.
pub struct CollectorRegistry {
    bus: EventBus,
    options: RegistryOptions,
    root: CancellationToken,
    collectors: Mutex<BTreeMap<String, ManagedCollector>>,
}

impl CollectorRegistry {
    /// Create a new collector registry.
    pub fn new(bus: EventBus, options: RegistryOptions) -> Self {
        Self {
            bus,
            options,
            root: CancellationToken::new(),
            collectors: Mutex::new(BTreeMap::new()),
        }
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field(
                "collector_count",
                &self.collectors.try_lock().map(|c| c.len()).unwrap_or(0),
            )
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    /// Register a collector. A zero `interval` registers it disabled.
    ///
    /// # Errors
    /// `AlreadyRegistered` for a duplicate name, `InvalidInterval` for a
    /// non-zero interval outside [`MIN_INTERVAL`, `MAX_INTERVAL`].
    pub async fn register<C: Collector>(
        &self,
        collector: C,
        interval: Duration,
    ) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(collector), interval).await
    }

    /// [`register`](Self::register) for an already shared collector.
    pub async fn register_arc(
        &self,
        collector: Arc<dyn Collector>,
        interval: Duration,
    ) -> Result<(), RegistryError> {
        let name = collector.name().to_string();
        if !interval.is_zero() && !interval_in_bounds(interval) {
            return Err(RegistryError::InvalidInterval { name, interval });
        }

        let mut collectors = self.collectors.lock().await;
        if collectors.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        let required = collector.required();
        tracing::debug!(collector = %name, interval = ?interval, required, "Collector registered");
        collectors.insert(
            name,
            ManagedCollector {
                collector,
                interval,
                enabled: !interval.is_zero(),
                required,
                stats: Arc::new(RunStats::default()),
                running: None,
            },
        );
        Ok(())
    }

    /// Start every enabled collector that is not already running.
    ///
    /// Returns the number of collectors started.
    pub async fn start_all(&self) -> usize {
        let mut collectors = self.collectors.lock().await;
        let mut started = 0;
        for (name, managed) in collectors.iter_mut() {
            if managed.enabled && managed.running.is_none() {
                self.start_collector(name, managed);
                started += 1;
            }
        }
        tracing::info!(started, total = collectors.len(), "Collectors started");
        started
    }

    /// Enable and start a collector at runtime.
    ///
    /// A collector registered with a zero interval gets its default
    /// interval. Enabling a running collector is a no-op.
    pub async fn enable(&self, name: &str) -> Result<(), RegistryError> {
        let mut collectors = self.collectors.lock().await;
        let managed = collectors
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;

        if managed.running.is_some() {
            return Ok(());
        }
        if managed.interval.is_zero() {
            managed.interval = managed.collector.default_interval();
        }
        managed.enabled = true;
        self.start_collector(name, managed);
        self.publish_state_change(name, managed, CollectorState::Running);
        Ok(())
    }

    /// Stop and disable a collector at runtime.
    ///
    /// Waits up to [`RegistryOptions::stop_timeout`] for an in-progress
    /// collection to finish. Other collectors stay manageable meanwhile.
    /// Disabling a stopped collector is a no-op.
    ///
    /// # Errors
    /// `RequiredCollector` if the collector may not be disabled.
    pub async fn disable(&self, name: &str) -> Result<(), RegistryError> {
        let running = {
            let mut collectors = self.collectors.lock().await;
            let managed = collectors
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;

            if managed.required {
                return Err(RegistryError::RequiredCollector(name.to_string()));
            }
            managed.enabled = false;
            match managed.running.take() {
                Some(running) => running,
                None => return Ok(()),
            }
        };

        running.stop(name, self.options.stop_timeout).await;

        let mut collectors = self.collectors.lock().await;
        // Re-enabled while we were stopping: that enable already reported.
        if let Some(managed) = collectors.get_mut(name)
            && managed.running.is_none()
        {
            managed.stats.set_state(CollectorState::Stopped);
            tracing::info!(collector = %name, "Collector disabled");
            self.publish_state_change(name, managed, CollectorState::Stopped);
        }
        Ok(())
    }

    /// Change a collector's polling interval, restarting it if running.
    ///
    /// # Errors
    /// `InvalidInterval` if `interval` is outside [`MIN_INTERVAL`,
    /// `MAX_INTERVAL`].
    pub async fn update_interval(&self, name: &str, interval: Duration) -> Result<(), RegistryError> {
        let mut collectors = self.collectors.lock().await;
        let managed = collectors
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;

        if !interval_in_bounds(interval) {
            return Err(RegistryError::InvalidInterval {
                name: name.to_string(),
                interval,
            });
        }

        managed.interval = interval;
        let Some(running) = managed.running.take() else {
            tracing::info!(collector = %name, interval = ?interval, "Collector interval updated");
            return Ok(());
        };
        drop(collectors);

        running.stop(name, self.options.stop_timeout).await;

        let mut collectors = self.collectors.lock().await;
        if let Some(managed) = collectors.get_mut(name)
            && managed.running.is_none()
        {
            if managed.enabled {
                self.start_collector(name, managed);
            } else {
                managed.stats.set_state(CollectorState::Stopped);
            }
        }
        tracing::info!(collector = %name, interval = ?interval, "Collector interval updated");
        Ok(())
    }

    /// Request an out-of-band collection.
    ///
    /// Returns `false` if the collector is not running or a request is
    /// already pending.
    pub async fn trigger(&self, name: &str) -> Result<bool, RegistryError> {
        let collectors = self.collectors.lock().await;
        let managed = collectors
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;
        Ok(managed
            .running
            .as_ref()
            .is_some_and(|r| r.trigger.request()))
    }

    /// Status of one collector.
    pub async fn status(&self, name: &str) -> Result<CollectorStatus, RegistryError> {
        let collectors = self.collectors.lock().await;
        collectors
            .get(name)
            .map(|m| m.status(name))
            .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))
    }

    /// Status of every collector, ordered by name.
    pub async fn statuses(&self) -> Vec<CollectorStatus> {
        let collectors = self.collectors.lock().await;
        collectors.iter().map(|(name, m)| m.status(name)).collect()
    }

    /// Names of every registered collector, ordered.
    pub async fn collector_names(&self) -> Vec<String> {
        self.collectors.lock().await.keys().cloned().collect()
    }

    /// Get the number of registered collectors.
    pub async fn collector_count(&self) -> usize {
        self.collectors.lock().await.len()
    }

    /// Gracefully stop every collector with the default timeout.
    pub async fn shutdown(self) -> bool {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop every collector, waiting at most `timeout` for them to exit.
    ///
    /// Returns `true` if all collectors stopped in time. Tasks still busy
    /// after the timeout are left to finish on their own.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> bool {
        self.root.cancel();

        let mut collectors = self.collectors.into_inner();
        let running: Vec<(String, RunningCollector)> = collectors
            .iter_mut()
            .filter_map(|(name, m)| m.running.take().map(|r| (name.clone(), r)))
            .collect();
        let count = running.len();

        let result = tokio::time::timeout(timeout, async {
            for (name, r) in running {
                r.stop(&name, timeout).await;
            }
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(collectors = count, "Collector shutdown complete");
                true
            }
            Err(_) => {
                tracing::warn!(collectors = count, timeout = ?timeout, "Collector shutdown timed out");
                false
            }
        }
    }

    // --- Private helpers ---

    fn start_collector(&self, name: &str, managed: &mut ManagedCollector) {
        let cancel = self.root.child_token();
        let runtime =
            CollectorRuntime::with_stats(Arc::clone(&managed.collector), Arc::clone(&managed.stats));
        let trigger = runtime.trigger();
        let watcher = self.spawn_watcher(name, managed.collector.as_ref(), &cancel, &trigger);
        let task = tokio::spawn(runtime.start(cancel.clone(), managed.interval));

        tracing::info!(
            collector = %name,
            interval = ?managed.interval,
            watching = watcher.is_some(),
            "Collector scheduled"
        );
        managed.running = Some(RunningCollector {
            cancel,
            trigger,
            task,
            watcher,
        });
    }

    /// Watch the collector's files and route debounced changes to its
    /// trigger lane. `None` means poll-only.
    fn spawn_watcher(
        &self,
        name: &str,
        collector: &dyn Collector,
        cancel: &CancellationToken,
        trigger: &CollectionTrigger,
    ) -> Option<JoinHandle<()>> {
        if !self.options.watch_files {
            return None;
        }
        let files = collector.watched_files();
        if files.is_empty() {
            return None;
        }

        let mut watcher = match FileWatcher::new(self.options.debounce) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(collector = %name, error = %e, "File watcher unavailable, polling only");
                return None;
            }
        };

        let mut watched = Vec::with_capacity(files.len());
        for file in files {
            match watcher.watch_file(&file) {
                Ok(()) => watched.push(file),
                Err(e) => {
                    tracing::warn!(collector = %name, path = %file.display(), error = %e, "Cannot watch file");
                }
            }
        }
        if watched.is_empty() {
            if let Err(e) = watcher.close() {
                tracing::debug!(collector = %name, error = %e, "Watcher close failed");
            }
            return None;
        }

        let name: Arc<str> = Arc::from(name);
        let cancel = cancel.clone();
        let trigger = trigger.clone();
        Some(tokio::spawn(async move {
            let log_name = Arc::clone(&name);
            watcher
                .run(cancel, &watched, move || {
                    if trigger.request() {
                        tracing::debug!(collector = %log_name, "File change triggered collection");
                    } else {
                        tracing::debug!(collector = %log_name, "Collection already pending");
                    }
                })
                .await;
            if let Err(e) = watcher.close() {
                tracing::debug!(collector = %name, error = %e, "Watcher close failed");
            }
        }))
    }

    fn publish_state_change(&self, name: &str, managed: &ManagedCollector, state: CollectorState) {
        let event = CollectorStateEvent {
            collector: name.to_string(),
            enabled: managed.enabled,
            state,
            interval: managed.interval,
            timestamp: Utc::now(),
        };
        self.bus.publish_to(&topics::COLLECTOR_STATE_CHANGE, event);
    }
}
