//! Host identity, uptime, load and memory from procfs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::bus::EventBus;
use crate::collector::{Collector, CollectorError};
use crate::config::DEFAULT_SYSTEM_INTERVAL;
use crate::model::{LoadAverage, SystemInfo};
use crate::topics;

/// Publishes [`SystemInfo`] on [`topics::SYSTEM_UPDATE`].
///
/// Cannot be disabled at runtime.
#[derive(Debug, Clone)]
pub struct SystemCollector {
    proc_root: PathBuf,
    bus: EventBus,
}

impl SystemCollector {
    pub fn new(proc_root: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            proc_root: proc_root.into(),
            bus,
        }
    }

    async fn read(&self, rel: &str) -> Result<String, CollectorError> {
        Ok(tokio::fs::read_to_string(self.proc_root.join(rel)).await?)
    }

    async fn snapshot(&self) -> Result<SystemInfo, CollectorError> {
        let uptime = parse_uptime(&self.read("uptime").await?)?;
        let load_average = parse_loadavg(&self.read("loadavg").await?)?;
        let mem = parse_meminfo(&self.read("meminfo").await?)?;
        let hostname = read_hostname(&self.proc_root).await;
        // cpuinfo is informational; its absence is not a failure.
        let cpu = match self.read("cpuinfo").await {
            Ok(content) => parse_cpuinfo(&content),
            Err(e) => {
                tracing::debug!(error = %e, "cpuinfo unavailable");
                CpuInfo::default()
            }
        };

        let used = mem.total.saturating_sub(mem.available);
        let usage = if mem.total > 0 {
            used as f64 / mem.total as f64 * 100.0
        } else {
            0.0
        };

        Ok(SystemInfo {
            hostname,
            uptime_seconds: uptime.as_secs(),
            cpu_model: cpu.model,
            cpu_threads: cpu.threads,
            load_average,
            ram_total_bytes: mem.total,
            ram_used_bytes: used,
            ram_free_bytes: mem.free,
            ram_buffers_bytes: mem.buffers,
            ram_cached_bytes: mem.cached,
            ram_usage_percent: usage,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait::async_trait]
impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    async fn collect(&self) -> Result<(), CollectorError> {
        let info = self.snapshot().await?;
        tracing::debug!(
            hostname = %info.hostname,
            uptime = info.uptime_seconds,
            ram_usage = info.ram_usage_percent,
            "Publishing system update"
        );
        self.bus.publish_to(&topics::SYSTEM_UPDATE, info);
        Ok(())
    }

    fn required(&self) -> bool {
        true
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_SYSTEM_INTERVAL
    }
}

// --- Parsers ---

/// Memory counters in bytes.
#[derive(Debug, Default, PartialEq, Eq)]
struct MemInfo {
    total: u64,
    free: u64,
    available: u64,
    buffers: u64,
    cached: u64,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CpuInfo {
    model: String,
    threads: usize,
}

fn parse_uptime(content: &str) -> Result<Duration, CollectorError> {
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| CollectorError::Parse("invalid uptime format".into()))
}

fn parse_loadavg(content: &str) -> Result<LoadAverage, CollectorError> {
    let mut parts = content.split_whitespace();
    let mut next = |label: &str| -> Result<f64, CollectorError> {
        parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CollectorError::Parse(format!("invalid {label} in loadavg")))
    };
    Ok(LoadAverage {
        one: next("load1")?,
        five: next("load5")?,
        fifteen: next("load15")?,
    })
}

fn parse_meminfo(content: &str) -> Result<MemInfo, CollectorError> {
    let mut info = MemInfo::default();
    let mut has_total = false;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb: u64 = rest
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let bytes = kb * 1024;
        match key {
            "MemTotal" => {
                info.total = bytes;
                has_total = true;
            }
            "MemFree" => info.free = bytes,
            "MemAvailable" => info.available = bytes,
            "Buffers" => info.buffers = bytes,
            "Cached" => info.cached = bytes,
            _ => {}
        }
    }

    if !has_total {
        return Err(CollectorError::Parse("MemTotal missing from meminfo".into()));
    }
    // Kernels before 3.14 have no MemAvailable.
    if info.available == 0 {
        info.available = info.free + info.buffers + info.cached;
    }
    Ok(info)
}

fn parse_cpuinfo(content: &str) -> CpuInfo {
    let mut info = CpuInfo::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => info.threads += 1,
            "model name" if info.model.is_empty() => info.model = value.trim().to_string(),
            _ => {}
        }
    }
    info
}

async fn read_hostname(proc_root: &Path) -> String {
    match tokio::fs::read_to_string(proc_root.join("sys/kernel/hostname")).await {
        Ok(name) => name.trim().to_string(),
        Err(_) => "unknown".to_string(),
    }
}
