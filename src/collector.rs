//! Collector Layer
//!
//! Periodic samplers and the machinery that drives them. Each collector runs
//! in its own Tokio task and hands its snapshots to the event bus.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for implementing samplers
//! - [`CollectorRuntime`]: Runs one collector once, then on an interval and
//!   on trigger requests, with panic isolation
//! - [`CollectorRegistry`]: Manages collector lifecycle, runtime
//!   enable/disable, file watchers and graceful shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use hostpulse::bus::EventBus;
//! use hostpulse::collector::{CollectorRegistry, RegistryOptions, SystemCollector};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::default();
//! let registry = CollectorRegistry::new(bus.clone(), RegistryOptions::default());
//! registry
//!     .register(SystemCollector::new("/proc", bus.clone()), Duration::from_secs(15))
//!     .await?;
//! registry.start_all().await;
//! // ...
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod array;
mod registry;
mod runtime;
mod system;
mod traits;
mod ups;

pub use array::ArrayCollector;
pub use registry::{
    CollectorRegistry, CollectorStatus, DEFAULT_SHUTDOWN_TIMEOUT, RegistryError, RegistryOptions,
};
pub use runtime::{CollectionTrigger, CollectorRuntime, CollectorState, RunSnapshot, RunStats};
pub use system::SystemCollector;
pub use traits::{
    Collector, CollectorError, DEFAULT_INTERVAL, MAX_INTERVAL, MIN_INTERVAL, interval_in_bounds,
};
pub use ups::UpsCollector;
