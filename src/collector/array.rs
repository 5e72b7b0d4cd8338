//! Storage array state from the emhttp ini files.
//!
//! `var.ini` carries the array state and the progress of any parity
//! operation; `disks.ini` carries one section per disk slot and is used to
//! count active parity disks. Both files are rewritten by the host's web
//! daemon whenever the array changes, so the collector watches them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;

use crate::bus::EventBus;
use crate::collector::{Collector, CollectorError};
use crate::config::{DEFAULT_ARRAY_INTERVAL, PathsConfig};
use crate::model::ArrayStatus;
use crate::topics;

/// Parity disk states that do not count as an active parity disk.
const INACTIVE_DISK_STATES: [&str; 3] = ["DISK_NP_DSBL", "DISK_NP", "DISK_DSBL"];

/// Publishes [`ArrayStatus`] on [`topics::ARRAY_STATUS_UPDATE`].
#[derive(Debug, Clone)]
pub struct ArrayCollector {
    var_ini: PathBuf,
    disks_ini: PathBuf,
    bus: EventBus,
}

impl ArrayCollector {
    pub fn new(paths: &PathsConfig, bus: EventBus) -> Self {
        Self {
            var_ini: paths.var_ini.clone(),
            disks_ini: paths.disks_ini.clone(),
            bus,
        }
    }

    async fn count_parity_disks(&self) -> u32 {
        match tokio::fs::read_to_string(&self.disks_ini).await {
            Ok(content) => count_parity_disks(&Ini::parse(&content)),
            Err(e) => {
                tracing::debug!(path = %self.disks_ini.display(), error = %e, "disks.ini unavailable");
                0
            }
        }
    }
}

#[async_trait::async_trait]
impl Collector for ArrayCollector {
    fn name(&self) -> &str {
        "array"
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let var = tokio::fs::read_to_string(&self.var_ini).await?;
        let parity_disks = self.count_parity_disks().await;
        let status = parse_array_status(&Ini::parse(&var), parity_disks);

        tracing::debug!(
            state = %status.state,
            disks = status.num_disks,
            parity = status.num_parity_disks,
            "Publishing array status"
        );
        self.bus.publish_to(&topics::ARRAY_STATUS_UPDATE, status);
        Ok(())
    }

    fn watched_files(&self) -> Vec<PathBuf> {
        vec![self.var_ini.clone(), self.disks_ini.clone()]
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_ARRAY_INTERVAL
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Minimal reader for the emhttp ini dialect: optional `["section"]`
/// headers and `key="value"` lines with quoted values.
#[derive(Debug, Default)]
struct Ini {
    /// Keys before the first header live under the empty section name.
    sections: Vec<(String, HashMap<String, String>)>,
}

impl Ini {
    fn parse(content: &str) -> Self {
        let mut sections = vec![(String::new(), HashMap::new())];

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push((unquote(header).to_string(), HashMap::new()));
                continue;
            }
            if let Some((key, value)) = line.split_once('=')
                && let Some((_, entries)) = sections.last_mut()
            {
                entries.insert(key.trim().to_string(), unquote(value).to_string());
            }
        }

        Self { sections }
    }

    fn global(&self, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name.is_empty())
            .and_then(|(_, entries)| entries.get(key))
            .map(String::as_str)
    }

    fn sections(&self) -> impl Iterator<Item = (&str, &HashMap<String, String>)> {
        self.sections
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, entries)| (name.as_str(), entries))
    }
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

fn count_parity_disks(disks: &Ini) -> u32 {
    let mut count = 0;
    for (section, entries) in disks.sections() {
        let (Some(kind), Some(status)) = (entries.get("type"), entries.get("status")) else {
            continue;
        };
        if kind != "Parity" {
            continue;
        }
        if INACTIVE_DISK_STATES.iter().any(|s| *s == status.as_str()) {
            tracing::debug!(section, status = %status, "Skipping inactive parity disk");
        } else {
            count += 1;
        }
    }
    count
}

fn parse_array_status(var: &Ini, parity_disks: u32) -> ArrayStatus {
    let number = |key: &str| -> Option<u64> { var.global(key).and_then(|v| v.parse().ok()) };

    let state = var.global("mdState").unwrap_or("unknown").to_string();
    let num_disks = number("mdNumDisks").and_then(|n| u32::try_from(n).ok()).unwrap_or(0);

    // sbSynced holds the time of the last completed sync, "0" if never.
    let synced = var.global("sbSynced").is_some_and(|v| !v.is_empty() && v != "0");
    let sync_errors = number("sbSyncErrs").unwrap_or(0);
    let parity_valid = parity_disks > 0 && synced && sync_errors == 0;

    let pos = number("mdResyncPos").unwrap_or(0);
    let size = number("mdResyncSize").unwrap_or(0);
    let dt = number("mdResyncDt").unwrap_or(0);

    let (parity_check_status, parity_check_progress) = if pos > 0 {
        let status = if dt == 0 {
            "paused"
        } else {
            sync_action_status(var.global("sbSyncAction").unwrap_or_default())
        };
        let progress = if size > 0 {
            (pos as f64 / size as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        (status.to_string(), progress)
    } else {
        (String::new(), 0.0)
    };

    ArrayStatus {
        state,
        num_disks,
        num_data_disks: num_disks.saturating_sub(parity_disks),
        num_parity_disks: parity_disks,
        parity_valid,
        parity_check_status,
        parity_check_progress,
        timestamp: Utc::now(),
    }
}

fn sync_action_status(action: &str) -> &'static str {
    let action = action.to_lowercase();
    if action.contains("clear") {
        "clearing"
    } else if action.contains("recon") {
        "reconstructing"
    } else {
        "running"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAR_INI: &str = r#"
version="6.12.4"
mdState="STARTED"
mdNumDisks="5"
sbSynced="1697040000"
sbSyncErrs="0"
mdResyncPos="0"
mdResyncSize="3907018532"
mdResyncDt="0"
sbSyncAction="check P"
"#;

    const DISKS_INI: &str = r#"
["parity"]
name="parity"
type="Parity"
status="DISK_OK"
["parity2"]
name="parity2"
type="Parity"
status="DISK_NP_DSBL"
["disk1"]
name="disk1"
type="Data"
status="DISK_OK"
["cache"]
name="cache"
type="Cache"
status="DISK_OK"
"#;

    #[test]
    fn test_ini_parse() {
        let ini = Ini::parse(DISKS_INI);
        let names: Vec<_> = ini.sections().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["parity", "parity2", "disk1", "cache"]);
        assert_eq!(Ini::parse(VAR_INI).global("mdState"), Some("STARTED"));
    }

    #[test]
    fn test_count_parity_disks_skips_inactive() {
        assert_eq!(count_parity_disks(&Ini::parse(DISKS_INI)), 1);
        assert_eq!(count_parity_disks(&Ini::parse("")), 0);
    }

    #[test]
    fn test_idle_array() {
        let status = parse_array_status(&Ini::parse(VAR_INI), 1);
        assert_eq!(status.state, "STARTED");
        assert_eq!(status.num_disks, 5);
        assert_eq!(status.num_data_disks, 4);
        assert!(status.parity_valid);
        assert_eq!(status.parity_check_status, "");
        assert_eq!(status.parity_check_progress, 0.0);
    }

    #[test]
    fn test_parity_invalid_without_parity_disk_or_with_errors() {
        assert!(!parse_array_status(&Ini::parse(VAR_INI), 0).parity_valid);

        let with_errors = VAR_INI.replace(r#"sbSyncErrs="0""#, r#"sbSyncErrs="12""#);
        assert!(!parse_array_status(&Ini::parse(&with_errors), 1).parity_valid);

        let never_synced = VAR_INI.replace(r#"sbSynced="1697040000""#, r#"sbSynced="0""#);
        assert!(!parse_array_status(&Ini::parse(&never_synced), 1).parity_valid);
    }

    #[test]
    fn test_parity_check_running_and_paused() {
        let running = VAR_INI
            .replace(r#"mdResyncPos="0""#, r#"mdResyncPos="1953509266""#)
            .replace(r#"mdResyncDt="0""#, r#"mdResyncDt="12""#);
        let status = parse_array_status(&Ini::parse(&running), 1);
        assert_eq!(status.parity_check_status, "running");
        assert!((status.parity_check_progress - 50.0).abs() < 0.01);

        let paused = VAR_INI.replace(r#"mdResyncPos="0""#, r#"mdResyncPos="100""#);
        let status = parse_array_status(&Ini::parse(&paused), 1);
        assert_eq!(status.parity_check_status, "paused");
    }

    #[test]
    fn test_sync_action_status() {
        assert_eq!(sync_action_status("check P"), "running");
        assert_eq!(sync_action_status("clear"), "clearing");
        assert_eq!(sync_action_status("recon P"), "reconstructing");
        assert_eq!(sync_action_status(""), "running");
    }

    #[test]
    fn test_missing_keys_default() {
        let status = parse_array_status(&Ini::parse(""), 0);
        assert_eq!(status.state, "unknown");
        assert_eq!(status.num_disks, 0);
        assert!(!status.parity_valid);
    }

    #[tokio::test]
    async fn test_collect_publishes_and_watches_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            var_ini: dir.path().join("var.ini"),
            disks_ini: dir.path().join("disks.ini"),
            ..PathsConfig::default()
        };
        std::fs::write(&paths.var_ini, VAR_INI).unwrap();
        std::fs::write(&paths.disks_ini, DISKS_INI).unwrap();

        let bus = EventBus::default();
        let mut sub = bus.subscribe(topics::ARRAY_STATUS_UPDATE.name());
        let collector = ArrayCollector::new(&paths, bus.clone());

        assert_eq!(
            collector.watched_files(),
            vec![paths.var_ini.clone(), paths.disks_ini.clone()]
        );

        collector.collect().await.unwrap();
        let event = sub.try_recv().unwrap();
        let status = event.payload::<ArrayStatus>().unwrap();
        assert_eq!(status.num_parity_disks, 1);
        assert_eq!(status.num_data_disks, 4);
    }

    #[tokio::test]
    async fn test_collect_without_var_ini_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            var_ini: dir.path().join("var.ini"),
            disks_ini: dir.path().join("disks.ini"),
            ..PathsConfig::default()
        };
        let collector = ArrayCollector::new(&paths, EventBus::default());
        assert!(matches!(collector.collect().await, Err(CollectorError::Io(_))));
    }
}
