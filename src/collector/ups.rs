//! UPS state via apcupsd (`apcaccess`) or Network UPS Tools (`upsc`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::bus::EventBus;
use crate::collector::{Collector, CollectorError};
use crate::config::DEFAULT_UPS_INTERVAL;
use crate::exec::CommandRunner;
use crate::model::UpsStatus;
use crate::topics;

const APCACCESS: &str = "apcaccess";
const UPSC: &str = "upsc";

/// Publishes [`UpsStatus`] on [`topics::UPS_STATUS_UPDATE`].
///
/// Tries apcupsd first and falls back to NUT. A host with neither tool
/// installed has no UPS; that is not an error and nothing is published.
pub struct UpsCollector {
    runner: Arc<dyn CommandRunner>,
    bus: EventBus,
}

impl UpsCollector {
    pub fn new(runner: Arc<dyn CommandRunner>, bus: EventBus) -> Self {
        Self { runner, bus }
    }

    async fn collect_apc(&self) -> Result<UpsStatus, CollectorError> {
        let output = self.runner.run(APCACCESS, &[]).await?;
        Ok(parse_apcaccess(&output))
    }

    async fn collect_nut(&self) -> Result<UpsStatus, CollectorError> {
        let list = match self.runner.run(UPSC, &["-l", "localhost"]).await {
            Ok(list) => list,
            Err(_) => self.runner.run(UPSC, &["-l"]).await?,
        };
        let device = list
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| CollectorError::Parse("no UPS devices found".into()))?;

        let target = format!("{device}@localhost");
        let output = self.runner.run(UPSC, &[target.as_str()]).await?;
        Ok(parse_upsc(&output))
    }
}

impl std::fmt::Debug for UpsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsCollector").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for UpsCollector {
    fn name(&self) -> &str {
        "ups"
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let mut last_err = None;

        if self.runner.command_exists(APCACCESS) {
            match self.collect_apc().await {
                Ok(status) => {
                    tracing::debug!(source = APCACCESS, status = %status.status, "Publishing UPS status");
                    self.bus.publish_to(&topics::UPS_STATUS_UPDATE, status);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(source = APCACCESS, error = %e, "Failed to collect UPS data");
                    last_err = Some(e);
                }
            }
        }

        if self.runner.command_exists(UPSC) {
            match self.collect_nut().await {
                Ok(status) => {
                    tracing::debug!(source = UPSC, status = %status.status, "Publishing UPS status");
                    self.bus.publish_to(&topics::UPS_STATUS_UPDATE, status);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(source = UPSC, error = %e, "Failed to collect UPS data");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => {
                tracing::debug!("No UPS detected or configured");
                Ok(())
            }
        }
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_UPS_INTERVAL
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn empty_status() -> UpsStatus {
    UpsStatus {
        connected: true,
        status: String::new(),
        load_percent: 0.0,
        battery_charge_percent: 0.0,
        runtime_left_seconds: 0,
        power_watts: 0.0,
        nominal_power_watts: 0.0,
        model: String::new(),
        timestamp: Utc::now(),
    }
}

/// `KEY : value` pairs, one per line.
fn key_values(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Leading number of a value such as `"25.0 Percent"`.
fn number(value: &str) -> Option<f64> {
    value.split_whitespace().next()?.parse().ok()
}

fn parse_apcaccess(output: &str) -> UpsStatus {
    let mut status = empty_status();
    for (key, value) in key_values(output) {
        match key {
            "STATUS" => status.status = value.to_string(),
            "MODEL" => status.model = value.to_string(),
            "LOADPCT" => status.load_percent = number(value).unwrap_or(0.0),
            "BCHARGE" => status.battery_charge_percent = number(value).unwrap_or(0.0),
            "TIMELEFT" => {
                // Minutes.
                if let Some(minutes) = number(value) {
                    status.runtime_left_seconds = (minutes * 60.0).max(0.0) as u64;
                }
            }
            "NOMPOWER" => status.nominal_power_watts = number(value).unwrap_or(0.0),
            _ => {}
        }
    }
    finish(status)
}

fn parse_upsc(output: &str) -> UpsStatus {
    let mut status = empty_status();
    for (key, value) in key_values(output) {
        match key {
            "ups.status" => status.status = value.to_string(),
            "device.model" | "ups.model" => status.model = value.to_string(),
            "ups.load" => status.load_percent = number(value).unwrap_or(0.0),
            "battery.charge" => status.battery_charge_percent = number(value).unwrap_or(0.0),
            "battery.runtime" => {
                if let Some(seconds) = number(value) {
                    status.runtime_left_seconds = seconds.max(0.0) as u64;
                }
            }
            "ups.power.nominal" | "ups.realpower.nominal" => {
                status.nominal_power_watts = number(value).unwrap_or(0.0);
            }
            _ => {}
        }
    }
    finish(status)
}

fn finish(mut status: UpsStatus) -> UpsStatus {
    if status.nominal_power_watts > 0.0 && status.load_percent > 0.0 {
        status.power_watts = status.nominal_power_watts * status.load_percent / 100.0;
    }
    status
}
