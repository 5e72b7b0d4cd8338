//! Configuration module for hostpulse.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Event bus settings (subscriber buffer size)
//! - File watcher settings (enabled, debounce window)
//! - Per-collector polling intervals
//! - Host file locations and command execution timeout

mod app;
mod validation;

pub use app::{
    AppConfig, BusConfig, CommandConfig, IntervalsConfig, PathsConfig, WatcherConfig,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration, validate_interval};

// Re-export constants
pub use app::{DEFAULT_ARRAY_INTERVAL, DEFAULT_SYSTEM_INTERVAL, DEFAULT_UPS_INTERVAL};
