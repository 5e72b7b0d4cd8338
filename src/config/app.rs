//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_BUFFER_SIZE;
use crate::collector::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::exec::DEFAULT_COMMAND_TIMEOUT;
use crate::watcher::DEFAULT_DEBOUNCE;

use super::validation::{ConfigError, expand_env_vars, require_positive, validate_interval};

// =============================================================================
// Constants
// =============================================================================

/// Default system collector interval (15 seconds).
pub const DEFAULT_SYSTEM_INTERVAL: Duration = Duration::from_secs(15);

/// Default array collector interval (30 seconds).
pub const DEFAULT_ARRAY_INTERVAL: Duration = Duration::from_secs(30);

/// Default UPS collector interval (60 seconds).
pub const DEFAULT_UPS_INTERVAL: Duration = Duration::from_secs(60);

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

// =============================================================================
// Bus Configuration
// =============================================================================

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of every subscriber channel (default: 256).
    pub buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

// =============================================================================
// Watcher Configuration
// =============================================================================

/// File watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Trigger collections on file changes (default: true).
    pub enabled: bool,

    /// Quiet period before a change triggers a collection (default: 500ms).
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

// =============================================================================
// Collector Intervals
// =============================================================================

/// Polling interval per collector. `0s` registers the collector disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    #[serde(with = "humantime_serde")]
    pub system: Duration,
    #[serde(with = "humantime_serde")]
    pub array: Duration,
    #[serde(with = "humantime_serde")]
    pub ups: Duration,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_INTERVAL,
            array: DEFAULT_ARRAY_INTERVAL,
            ups: DEFAULT_UPS_INTERVAL,
        }
    }
}

impl IntervalsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_interval("system", self.system)?;
        validate_interval("array", self.array)?;
        validate_interval("ups", self.ups)?;
        Ok(())
    }
}

// =============================================================================
// Paths Configuration
// =============================================================================

/// Well-known host file locations read by the samplers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// procfs mount point (default: "/proc").
    pub proc_root: PathBuf,

    /// Array state file (default: "/var/local/emhttp/var.ini").
    pub var_ini: PathBuf,

    /// Disk assignment file (default: "/var/local/emhttp/disks.ini").
    pub disks_ini: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            var_ini: PathBuf::from("/var/local/emhttp/var.ini"),
            disks_ini: PathBuf::from("/var/local/emhttp/disks.ini"),
        }
    }
}

// =============================================================================
// Command Configuration
// =============================================================================

/// External command execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Per-command timeout (default: 60s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub intervals: IntervalsConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub command: CommandConfig,

    /// Time allowed for collectors to stop on shutdown (default: 5s).
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if an existing file cannot be read, parsed, or
    /// validated.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "bus buffer_size must be positive".to_string(),
            ));
        }

        require_positive("watcher.debounce", self.watcher.debounce)?;
        require_positive("command.timeout", self.command.timeout)?;
        require_positive("shutdown_timeout", self.shutdown_timeout)?;

        self.intervals.validate()?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            watcher: WatcherConfig::default(),
            intervals: IntervalsConfig::default(),
            paths: PathsConfig::default(),
            command: CommandConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bus.buffer_size, 256);
        assert!(config.watcher.enabled);
        assert_eq!(config.watcher.debounce, Duration::from_millis(500));
        assert_eq!(config.intervals.system, Duration::from_secs(15));
        assert_eq!(config.intervals.array, Duration::from_secs(30));
        assert_eq!(config.intervals.ups, Duration::from_secs(60));
        assert_eq!(config.command.timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
bus:
  buffer_size: 64
watcher:
  enabled: false
  debounce: 250ms
intervals:
  system: 5s
  array: 0s
  ups: 2m
paths:
  proc_root: /host/proc
  var_ini: /tmp/emhttp/var.ini
  disks_ini: /tmp/emhttp/disks.ini
command:
  timeout: 10s
shutdown_timeout: 3s
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.bus.buffer_size, 64);
        assert!(!config.watcher.enabled);
        assert_eq!(config.watcher.debounce, Duration::from_millis(250));
        assert_eq!(config.intervals.system, Duration::from_secs(5));
        assert_eq!(config.intervals.array, Duration::ZERO);
        assert_eq!(config.intervals.ups, Duration::from_secs(120));
        assert_eq!(config.paths.proc_root, PathBuf::from("/host/proc"));
        assert_eq!(config.command.timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = AppConfig::from_yaml("intervals:\n  ups: 90s\n").unwrap();
        assert_eq!(config.intervals.ups, Duration::from_secs(90));
        assert_eq!(config.intervals.system, DEFAULT_SYSTEM_INTERVAL);
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_env_expansion_in_paths() {
        let yaml = "paths:\n  var_ini: ${HOSTPULSE_UNSET_VAR_INI:-/srv/var.ini}\n";
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.paths.var_ini, PathBuf::from("/srv/var.ini"));
    }

    #[test]
    fn test_validation_rejects_zero_buffer() {
        let err = AppConfig::from_yaml("bus:\n  buffer_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("buffer_size"));
    }

    #[test]
    fn test_validation_rejects_zero_debounce() {
        let err = AppConfig::from_yaml("watcher:\n  debounce: 0s\n").unwrap_err();
        assert!(err.to_string().contains("watcher.debounce"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_interval() {
        let err = AppConfig::from_yaml("intervals:\n  system: 2h\n").unwrap_err();
        assert!(err.to_string().contains("'system'"));
    }

    #[test]
    fn test_invalid_duration_is_parse_error() {
        let err = AppConfig::from_yaml("command:\n  timeout: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "bus:\n  buffer_size: 32\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.bus.buffer_size, 32);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        assert!(matches!(AppConfig::load(&path), Err(ConfigError::IoError(_))));
        assert_eq!(AppConfig::load_or_default(&path).unwrap(), AppConfig::default());
    }
}
