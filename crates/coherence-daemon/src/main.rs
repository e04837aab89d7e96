//! Coherence Daemon - hosts the coherence monitor as a long-running process
//!
//! The daemon:
//! - Loads layered configuration
//! - Feeds the monitor from a simulated metric source
//! - Logs monitor events through tracing
//! - Prints the final status as JSON on shutdown

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use coherence_daemon::{DaemonConfig, DaemonError, DaemonResult, LoggingConfig, SimulatedSource};
use coherence_monitor::{LifecycleState, LogSink, MonitorEvent, Orchestrator};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Coherence Daemon CLI
#[derive(Parser)]
#[command(name = "coherenced")]
#[command(about = "Coherence Daemon - continuous health monitoring and self-correction", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COHERENCE_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "COHERENCE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "COHERENCE_LOG_JSON")]
    json: bool,

    /// Simulation seed (overrides the configuration file)
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long)]
    run_for_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    if let Some(seed) = cli.seed {
        config.simulation.seed = Some(seed);
    }

    init_tracing(&config.logging);
    config.validate().map_err(DaemonError::Config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        components = ?config.simulation.components,
        seed = ?config.simulation.seed,
        "Starting coherence daemon"
    );

    let source = Arc::new(SimulatedSource::new(&config.simulation));
    let monitor = Orchestrator::builder(config.monitor.clone())
        .source(source)
        .sink(Arc::new(LogSink))
        .build()?;

    let mut events = monitor.subscribe();
    monitor.start().await?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = run_limit(cli.run_for_secs) => {
            info!("Run time elapsed, shutting down");
        }
        _ = stopped_by_monitor(&mut events) => {
            warn!("Monitor stopped on its own, shutting down");
        }
    }

    let stopped = monitor.stop().await;

    let status = monitor.get_status()?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    stopped?;
    info!("Coherence daemon exited");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run_limit(secs: Option<u64>) {
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Resolves when the monitor transitions to stopped without being asked.
async fn stopped_by_monitor(events: &mut broadcast::Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::LifecycleChanged {
                to: LifecycleState::Stopped,
                ..
            }) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
