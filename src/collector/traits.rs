//! Core collector traits and types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exec::ExecError;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum allowed interval (1 hour).
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);
/// Interval used when a collector does not declare its own (30 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that can occur during collection.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Reading a source file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Source content could not be understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// An external command failed.
    #[error("command error: {0}")]
    Command(#[from] ExecError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

/// Core collector trait for implementing samplers.
///
/// A collector gathers one domain's state and hands the result to its
/// consumers through the event bus it holds internally. Scheduling, fault
/// isolation and cancellation are the runtime's job, not the collector's.
///
/// # Error Handling
///
/// - **Expected failures** (file missing, command not installed, unparseable
///   output) are returned as `Err(CollectorError)`. The runtime logs and
///   counts them, then waits for the next tick. There is no retry.
/// - **Panics** are caught at the runtime boundary, logged and counted. The
///   collector keeps being scheduled.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Unique identifier for this collector.
    fn name(&self) -> &str;

    /// Perform one collection cycle.
    async fn collect(&self) -> Result<(), CollectorError>;

    /// Files whose modification should trigger an early collection.
    fn watched_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Whether the collector may be disabled at runtime.
    fn required(&self) -> bool {
        false
    }

    /// Interval restored when the collector is enabled after being
    /// registered disabled.
    fn default_interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }
}

/// Check a polling interval against [`MIN_INTERVAL`] and [`MAX_INTERVAL`].
///
/// A zero interval is not valid here; callers that treat zero as
/// "disabled" handle it before calling.
pub fn interval_in_bounds(interval: Duration) -> bool {
    (MIN_INTERVAL..=MAX_INTERVAL).contains(&interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    #[async_trait::async_trait]
    impl Collector for Minimal {
        fn name(&self) -> &str {
            "minimal"
        }

        async fn collect(&self) -> Result<(), CollectorError> {
            Ok(())
        }
    }

    #[test]
    fn test_trait_defaults() {
        let c = Minimal;
        assert!(c.watched_files().is_empty());
        assert!(!c.required());
        assert_eq!(c.default_interval(), DEFAULT_INTERVAL);
    }

    #[test]
    fn test_interval_bounds() {
        assert!(!interval_in_bounds(Duration::ZERO));
        assert!(!interval_in_bounds(Duration::from_millis(999)));
        assert!(interval_in_bounds(MIN_INTERVAL));
        assert!(interval_in_bounds(Duration::from_secs(30)));
        assert!(interval_in_bounds(MAX_INTERVAL));
        assert!(!interval_in_bounds(MAX_INTERVAL + Duration::from_secs(1)));
    }

    #[test]
    fn test_error_display() {
        let err = CollectorError::Parse("mdState missing".into());
        assert_eq!(err.to_string(), "parse error: mdState missing");
    }
}
