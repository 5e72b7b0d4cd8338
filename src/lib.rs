//! Hostpulse - Host Telemetry Library
//!
//! This crate provides the core of the hostpulse agent: periodic collectors
//! that sample host state, a debounced file watcher that triggers them early,
//! and an in-process event bus that fans their snapshots out to subscribers.
//! It can be embedded by other Rust projects, or run as a standalone binary
//! with the `hostpulse` executable.
//!
//! # Architecture
//!
//! - **Bus** ([`bus`]): Topic-keyed publish/subscribe with bounded channels
//! - **Watcher** ([`watcher`]): Debounced filesystem change notifications
//! - **Collectors** ([`collector`]): Runtime, registry and host samplers
//! - **Config** ([`config`]): YAML configuration with env var expansion
//!
//! # Example
//!
//! ```rust,no_run
//! use hostpulse::{AppConfig, CollectorRegistry, EventBus, RegistryOptions};
//! use hostpulse::collector::SystemCollector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::default();
//!     let bus = EventBus::new(config.bus.buffer_size);
//!     let registry = CollectorRegistry::new(bus.clone(), RegistryOptions::default());
//!
//!     registry
//!         .register(
//!             SystemCollector::new(&config.paths.proc_root, bus.clone()),
//!             config.intervals.system,
//!         )
//!         .await?;
//!     registry.start_all().await;
//!
//!     let mut sub = bus.subscribe(hostpulse::topics::SYSTEM_UPDATE.name());
//!     if let Some(event) = sub.recv().await {
//!         println!("{}", event.topic());
//!     }
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod collector;
pub mod config;
pub mod exec;
pub mod model;
pub mod topics;
pub mod watcher;

pub use bus::{Event, EventBus, Subscription, Topic};
pub use collector::{
    Collector, CollectorError, CollectorRegistry, CollectorStatus, RegistryError, RegistryOptions,
};
pub use config::{AppConfig, ConfigError};
pub use exec::{CommandRunner, ExecError, SystemCommandRunner};
pub use watcher::{FileWatcher, WatchError};
