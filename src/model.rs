//! Snapshot payloads published on the event bus.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::CollectorState;

/// Host identity, uptime, load and memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub uptime_seconds: u64,
    pub cpu_model: String,
    pub cpu_threads: usize,
    pub load_average: LoadAverage,
    pub ram_total_bytes: u64,
    pub ram_used_bytes: u64,
    pub ram_free_bytes: u64,
    pub ram_buffers_bytes: u64,
    pub ram_cached_bytes: u64,
    pub ram_usage_percent: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Storage array state and parity status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayStatus {
    pub state: String,
    pub num_disks: u32,
    pub num_data_disks: u32,
    pub num_parity_disks: u32,
    pub parity_valid: bool,
    /// Empty when no parity operation is active.
    pub parity_check_status: String,
    pub parity_check_progress: f64,
    pub timestamp: DateTime<Utc>,
}

/// Power supply state as reported by the UPS daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsStatus {
    pub connected: bool,
    pub status: String,
    pub load_percent: f64,
    pub battery_charge_percent: f64,
    pub runtime_left_seconds: u64,
    pub power_watts: f64,
    pub nominal_power_watts: f64,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// Published whenever a collector is enabled or disabled at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorStateEvent {
    pub collector: String,
    pub enabled: bool,
    pub state: CollectorState,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_event_serializes_human_interval() {
        let event = CollectorStateEvent {
            collector: "array".into(),
            enabled: true,
            state: CollectorState::Running,
            interval: Duration::from_secs(30),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["interval"], "30s");
        assert_eq!(json["state"], "running");
        assert_eq!(json["enabled"], true);
    }

    #[test]
    fn test_state_event_from_json() {
        let json = r#"{
            "collector": "ups",
            "enabled": false,
            "state": "stopped",
            "interval": "1m",
            "timestamp": "2024-01-15T10:30:00Z"
        }"#;
        let event: CollectorStateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.collector, "ups");
        assert_eq!(event.state, CollectorState::Stopped);
        assert_eq!(event.interval, Duration::from_secs(60));

        let back: CollectorStateEvent =
            serde_json::from_value(serde_json::to_value(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let json = r#"{"collector":"ups","enabled":true,"state":"paused","interval":"1m","timestamp":"2024-01-15T10:30:00Z"}"#;
        assert!(serde_json::from_str::<CollectorStateEvent>(json).is_err());
    }
}
