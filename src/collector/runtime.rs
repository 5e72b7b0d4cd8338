//! Per-collector execution loop.
//!
//! A [`CollectorRuntime`] owns one collector and drives it: once right away,
//! then on every interval tick and every [`CollectionTrigger`] request, until
//! its cancellation token fires. Ticks and triggers share one loop, so
//! invocations of the same collector never overlap.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use super::Collector;

/// Lifecycle of a collector runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    /// Built but never started.
    #[default]
    Created,
    /// Loop is active.
    Running,
    /// Loop exited after cancellation.
    Stopped,
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of a runtime's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub state: CollectorState,
    /// Invocations started, whatever their outcome.
    pub runs: u64,
    /// Invocations that returned an error.
    pub errors: u64,
    /// Invocations that panicked.
    pub panics: u64,
    /// Invocations caused by a trigger request rather than the timer.
    pub triggered: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
    pub last_error: Option<String>,
}

/// Counters shared between a runtime and whoever observes it.
///
/// Survives restarts: the registry hands the same stats to every runtime it
/// builds for a collector.
#[derive(Debug, Default)]
pub struct RunStats {
    inner: Mutex<RunSnapshot>,
}

impl RunStats {
    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().clone()
    }

    pub(crate) fn set_state(&self, state: CollectorState) {
        self.lock().state = state;
    }

    fn record(&self, cause: RunCause, started_at: DateTime<Utc>, elapsed: Duration, outcome: &Outcome) {
        let mut s = self.lock();
        s.runs += 1;
        if cause == RunCause::Trigger {
            s.triggered += 1;
        }
        s.last_run = Some(started_at);
        s.last_duration = Some(elapsed);
        match outcome {
            Outcome::Success => {}
            Outcome::Failed(msg) => {
                s.errors += 1;
                s.last_error = Some(msg.clone());
            }
            Outcome::Panicked(msg) => {
                s.panics += 1;
                s.last_error = Some(format!("panic: {msg}"));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle that asks a runtime for an out-of-band collection.
///
/// Requests coalesce: while one is pending, further requests are absorbed
/// into it.
#[derive(Debug, Clone)]
pub struct CollectionTrigger {
    tx: mpsc::Sender<()>,
}

impl CollectionTrigger {
    /// Queue a collection. Returns `false` if one was already queued or the
    /// runtime is gone.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunCause {
    Initial,
    Tick,
    Trigger,
}

enum Outcome {
    Success,
    Failed(String),
    Panicked(String),
}

/// Drives a single collector.
pub struct CollectorRuntime {
    collector: Arc<dyn Collector>,
    stats: Arc<RunStats>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl CollectorRuntime {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self::with_stats(collector, Arc::new(RunStats::default()))
    }

    /// Build a runtime that records into existing stats.
    pub fn with_stats(collector: Arc<dyn Collector>, stats: Arc<RunStats>) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            collector,
            stats,
            trigger_tx,
            trigger_rx,
        }
    }

    pub fn name(&self) -> &str {
        self.collector.name()
    }

    pub fn trigger(&self) -> CollectionTrigger {
        CollectionTrigger {
            tx: self.trigger_tx.clone(),
        }
    }

    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires.
    ///
    /// Collects once immediately, then every `interval` and on every trigger
    /// request. A zero `interval` disables the timer; only triggers run the
    /// collector then. Cancellation is observed between invocations, never
    /// in the middle of one.
    ///
    /// When `collect()` takes longer than `interval`, missed ticks fire back
    /// to back afterwards (the timer's burst behaviour); they are not
    /// skipped.
    pub async fn start(mut self, cancel: CancellationToken, interval: Duration) {
        let name: Arc<str> = Arc::from(self.collector.name());
        if cancel.is_cancelled() {
            tracing::debug!(collector = %name, "Cancelled before start");
            self.stats.set_state(CollectorState::Stopped);
            return;
        }

        self.stats.set_state(CollectorState::Running);
        tracing::info!(collector = %name, interval = ?interval, "Collector started");

        self.run_once(&name, RunCause::Initial).await;

        let mut ticker = (!interval.is_zero())
            .then(|| tokio::time::interval_at(Instant::now() + interval, interval));

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = next_tick(&mut ticker) => {
                    self.run_once(&name, RunCause::Tick).await;
                }

                Some(()) = self.trigger_rx.recv() => {
                    self.run_once(&name, RunCause::Trigger).await;
                }
            }
        }

        self.stats.set_state(CollectorState::Stopped);
        tracing::info!(collector = %name, "Collector stopped");
    }

    /// One invocation inside its own task so a panic stays contained.
    async fn run_once(&self, name: &str, cause: RunCause) {
        let collector = Arc::clone(&self.collector);
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::debug!(collector = %name, cause = ?cause, "Running collection");

        let outcome = match tokio::spawn(async move { collector.collect().await }).await {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
            Err(e) => Outcome::Failed(e.to_string()),
        };
        let elapsed = start.elapsed();

        match &outcome {
            Outcome::Success => {
                tracing::debug!(collector = %name, elapsed = ?elapsed, "Collection succeeded");
            }
            Outcome::Failed(error) => {
                tracing::error!(collector = %name, error = %error, "Collection failed");
            }
            Outcome::Panicked(message) => {
                tracing::error!(collector = %name, panic = %message, "Collector panicked");
            }
        }

        self.stats.record(cause, started_at, elapsed, &outcome);
    }
}

impl std::fmt::Debug for CollectorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRuntime")
            .field("collector", &self.collector.name())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Collector that counts calls and tracks how many run at once.
    #[derive(Default)]
    struct Probe {
        name: &'static str,
        work: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        panic_on: Option<usize>,
        fail_on: Option<usize>,
        finished: AtomicBool,
    }

    impl Probe {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }

        fn with_work(mut self, work: Duration) -> Self {
            self.work = work;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Collector for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn collect(&self) -> Result<(), CollectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.store(true, Ordering::SeqCst);

            if self.panic_on == Some(n) {
                panic!("probe exploded on call {n}");
            }
            if self.fail_on == Some(n) {
                return Err(CollectorError::Parse(format!("bad input on call {n}")));
            }
            Ok(())
        }
    }

    fn spawn(
        probe: Arc<Probe>,
        interval: Duration,
    ) -> (CancellationToken, CollectionTrigger, Arc<RunStats>, tokio::task::JoinHandle<()>) {
        let runtime = CollectorRuntime::new(probe);
        let trigger = runtime.trigger();
        let stats = runtime.stats();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runtime.start(cancel.clone(), interval));
        (cancel, trigger, stats, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval() {
        let probe = Arc::new(Probe::new("interval"));
        let (cancel, _trigger, stats, handle) = spawn(Arc::clone(&probe), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(probe.calls(), 1);
        assert_eq!(stats.snapshot().state, CollectorState::Running);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(probe.calls(), 2);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(stats.snapshot().state, CollectorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_does_not_stop_schedule() {
        let probe = Arc::new(Probe {
            panic_on: Some(3),
            fail_on: Some(5),
            ..Probe::new("faulty")
        });
        let (cancel, _trigger, stats, handle) = spawn(Arc::clone(&probe), Duration::from_millis(100));

        // Calls at t = 0, 100, 200, 300, 400, 500 ms.
        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(probe.calls(), 6);
        let snap = stats.snapshot();
        assert_eq!(snap.runs, 6);
        assert_eq!(snap.panics, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.last_error.as_deref(), Some("parse error: bad input on call 5"));
        assert_eq!(snap.state, CollectorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_intervals_without_overlap() {
        let fast = Arc::new(Probe::new("fast").with_work(Duration::from_millis(10)));
        let slow = Arc::new(Probe::new("slow").with_work(Duration::from_millis(10)));
        let (c1, _t1, _s1, h1) = spawn(Arc::clone(&fast), Duration::from_millis(100));
        let (c2, _t2, _s2, h2) = spawn(Arc::clone(&slow), Duration::from_millis(250));

        tokio::time::sleep(Duration::from_millis(950)).await;
        c1.cancel();
        c2.cancel();
        h1.await.unwrap();
        h2.await.unwrap();

        assert_eq!(fast.calls(), 10);
        assert_eq!(slow.calls(), 4);
        assert_eq!(fast.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_collect_never_overlaps_itself() {
        let probe = Arc::new(Probe::new("slow").with_work(Duration::from_millis(150)));
        let (cancel, trigger, _stats, handle) = spawn(Arc::clone(&probe), Duration::from_millis(100));

        for _ in 0..10 {
            trigger.request();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(probe.calls() >= 3);
        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_requests_coalesce() {
        let probe = Arc::new(Probe::new("triggered").with_work(Duration::from_millis(100)));
        let (cancel, trigger, stats, handle) = spawn(Arc::clone(&probe), Duration::from_secs(3600));

        assert!(trigger.request());
        for _ in 0..4 {
            assert!(!trigger.request());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.calls(), 2);
        assert_eq!(stats.snapshot().triggered, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_runs_only_on_trigger() {
        let probe = Arc::new(Probe::new("manual"));
        let (cancel, trigger, _stats, handle) = spawn(Arc::clone(&probe), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls(), 1);

        trigger.request();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(probe.calls(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_interrupt_running_collect() {
        let probe = Arc::new(Probe::new("long").with_work(Duration::from_millis(200)));
        let (cancel, _trigger, _stats, handle) = spawn(Arc::clone(&probe), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(probe.finished.load(Ordering::SeqCst));
        assert_eq!(probe.calls(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_never_collects() {
        let probe = Arc::new(Probe::new("early"));
        let runtime = CollectorRuntime::new(Arc::clone(&probe) as Arc<dyn Collector>);
        let stats = runtime.stats();
        let cancel = CancellationToken::new();
        cancel.cancel();

        runtime.start(cancel, Duration::from_secs(1)).await;
        assert_eq!(probe.calls(), 0);
        assert_eq!(stats.snapshot().state, CollectorState::Stopped);
    }

    #[tokio::test]
    async fn test_trigger_after_runtime_dropped() {
        let runtime = CollectorRuntime::new(Arc::new(Probe::new("gone")));
        let trigger = runtime.trigger();
        drop(runtime);
        assert!(!trigger.request());
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "non-string panic payload");
    }
}
