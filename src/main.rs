//! Hostpulse Binary Entry Point
//!
//! This binary runs the host telemetry agent.
//! Core functionality is provided by the `hostpulse` library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hostpulse::{
    Event, EventBus,
    collector::{ArrayCollector, CollectorRegistry, RegistryOptions, SystemCollector, UpsCollector},
    config::{AppConfig, parse_duration},
    exec::SystemCommandRunner,
    model::{ArrayStatus, CollectorStateEvent, SystemInfo, UpsStatus},
    topics,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hostpulse - Host Telemetry Agent
#[derive(Parser, Debug)]
#[command(name = "hostpulse", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "HOSTPULSE_CONFIG"
    )]
    config: String,

    /// File watcher debounce window, e.g. "500ms" (overrides config file)
    #[arg(long, env = "HOSTPULSE_DEBOUNCE", value_parser = parse_duration)]
    debounce: Option<Duration>,

    /// Subscriber channel capacity (overrides config file)
    #[arg(long, env = "HOSTPULSE_BUFFER_SIZE")]
    buffer_size: Option<usize>,

    /// Log every published event as JSON
    #[arg(long)]
    print_events: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hostpulse=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hostpulse - Host Telemetry Agent");

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_or_default(&cli.config)?;

    // CLI > ENV > config file
    if let Some(debounce) = cli.debounce {
        config.watcher.debounce = debounce;
    }
    if let Some(buffer_size) = cli.buffer_size {
        config.bus.buffer_size = buffer_size;
    }
    config.validate()?;

    tracing::info!(
        buffer_size = config.bus.buffer_size,
        watcher = config.watcher.enabled,
        debounce = ?config.watcher.debounce,
        "Configuration loaded"
    );

    let bus = EventBus::new(config.bus.buffer_size);
    let registry = CollectorRegistry::new(
        bus.clone(),
        RegistryOptions {
            watch_files: config.watcher.enabled,
            debounce: config.watcher.debounce,
            stop_timeout: config.shutdown_timeout,
        },
    );

    let runner = Arc::new(SystemCommandRunner::new(config.command.timeout));
    registry
        .register(
            SystemCollector::new(&config.paths.proc_root, bus.clone()),
            config.intervals.system,
        )
        .await?;
    registry
        .register(
            ArrayCollector::new(&config.paths, bus.clone()),
            config.intervals.array,
        )
        .await?;
    registry
        .register(UpsCollector::new(runner, bus.clone()), config.intervals.ups)
        .await?;

    let printer = CancellationToken::new();
    let printer_task = cli
        .print_events
        .then(|| tokio::spawn(print_events(bus.clone(), printer.clone())));

    let started = registry.start_all().await;
    tracing::info!("{} collectors running, press Ctrl+C to shutdown", started);

    shutdown_signal().await;

    tracing::info!("Shutting down collectors...");
    if !registry.shutdown_with_timeout(config.shutdown_timeout).await {
        tracing::warn!(
            "Collectors did not stop within {}",
            humantime::format_duration(config.shutdown_timeout)
        );
    }

    printer.cancel();
    if let Some(task) = printer_task
        && let Err(e) = task.await
    {
        tracing::warn!(error = %e, "Event printer task ended abnormally");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log every event on the well-known topics until cancelled.
async fn print_events(bus: EventBus, cancel: CancellationToken) {
    let mut sub = bus.subscribe_many(&topics::ALL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = sub.recv() => match event {
                Some(event) => match event_json(&event) {
                    Some(json) => tracing::info!(topic = event.topic(), "{}", json),
                    None => tracing::info!(topic = event.topic(), "event with unknown payload"),
                },
                None => break,
            },
        }
    }
    bus.unsubscribe_all(&sub);
}

fn event_json(event: &Event) -> Option<String> {
    let value = if let Some(p) = event.payload::<SystemInfo>() {
        serde_json::to_string(p)
    } else if let Some(p) = event.payload::<ArrayStatus>() {
        serde_json::to_string(p)
    } else if let Some(p) = event.payload::<UpsStatus>() {
        serde_json::to_string(p)
    } else if let Some(p) = event.payload::<CollectorStateEvent>() {
        serde_json::to_string(p)
    } else {
        return None;
    };
    value.ok()
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
