//! Configuration validation utilities.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::collector::{MAX_INTERVAL, MIN_INTERVAL, interval_in_bounds};

/// Errors raised while loading the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A value parsed but is out of range.
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Parse a human-readable duration such as `500ms`, `15s` or `1h30m`.
///
/// Used for CLI overrides; the YAML file goes through `humantime_serde`,
/// which accepts the same syntax.
///
/// # Examples
///
/// ```
/// use hostpulse::config::parse_duration;
///
/// assert_eq!(parse_duration("15s").unwrap().as_secs(), 15);
/// assert_eq!(parse_duration("500ms").unwrap().as_millis(), 500);
/// assert!(parse_duration("   ").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("empty duration".to_string()),
        trimmed => humantime::parse_duration(trimmed)
            .map_err(|e| format!("invalid duration '{trimmed}': {e}")),
    }
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(?<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?<fallback>[^}]*))?\}")
        .expect("env reference pattern is valid")
});

/// Substitute `${VAR}` and `${VAR:-fallback}` references from the process
/// environment. Unset variables without a fallback become empty.
pub fn expand_env_vars(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures<'_>| {
            std::env::var(&caps["name"]).unwrap_or_else(|_| {
                caps.name("fallback")
                    .map_or_else(String::new, |m| m.as_str().to_owned())
            })
        })
        .into_owned()
}

/// Check a collector polling interval: zero (disabled) or within
/// [`MIN_INTERVAL`, `MAX_INTERVAL`].
pub fn validate_interval(collector: &str, interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() || interval_in_bounds(interval) {
        return Ok(());
    }
    Err(ConfigError::ValidationError(format!(
        "interval for '{collector}' must be 0 or between {} and {}, got {}",
        humantime::format_duration(MIN_INTERVAL),
        humantime::format_duration(MAX_INTERVAL),
        humantime::format_duration(interval),
    )))
}

/// Reject a zero duration for a setting that needs a positive one.
pub fn require_positive(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be positive"
        )));
    }
    Ok(())
}
