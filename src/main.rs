//! # CRSF Bridge
//!
//! Carry a CRSF radio link over UDP and send simulator telemetry back to the
//! radio.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crsf_bridge::bridge::{forward, receiver, router, telemetry_link};
use crsf_bridge::config::{Config, LoggingConfig};

const USAGE: &str = "usage: crsf-bridge <forward|router|receiver|telemetry> [config.toml]";

/// Deployment selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Serial ↔ UDP bridge
    Forward,
    /// Simulator telemetry fan-out
    Router,
    /// RC channel receiver with telemetry return path
    Receiver,
    /// Standalone simulator telemetry encoder
    Telemetry,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(Self::Forward),
            "router" => Ok(Self::Router),
            "receiver" => Ok(Self::Receiver),
            "telemetry" => Ok(Self::Telemetry),
            other => bail!("unknown mode '{}'\n{}", other, USAGE),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Forward => "forward",
            Self::Router => "router",
            Self::Receiver => "receiver",
            Self::Telemetry => "telemetry",
        };
        f.write_str(name)
    }
}

/// Parse `<mode> [config.toml]`
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<(Mode, Option<PathBuf>)> {
    let mut args = args.into_iter();
    let mode = args.next().context(USAGE)?.parse()?;
    let config = args.next().map(PathBuf::from);
    if args.next().is_some() {
        bail!("too many arguments\n{}", USAGE);
    }
    Ok((mode, config))
}

/// Set up console logging, plus daily log files when a directory is configured
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = config
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.level))?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "crsf-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

/// Main entry point for CRSF Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse the mode and optional configuration file
///    - Set up logging
///    - Open the serial port and sockets the mode needs and spawn its tasks
///
/// 2. **Running**
///    - Tasks run until Ctrl+C or until any of them finishes (router QUIT,
///      serial port closed, fatal I/O error)
///
/// 3. **Graceful Shutdown**
///    - Broadcast shutdown; every task leaves its loop (the telemetry client
///      unregisters from the router on the way out)
///    - Join all tasks, then report the first failure, if any
///
/// # Examples
///
/// ```bash
/// crsf-bridge forward config/bridge.toml
/// RUST_LOG=crsf_bridge=debug crsf-bridge receiver
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (mode, config_path) = parse_args(std::env::args().skip(1))?;

    let config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging)?;

    info!("CRSF Bridge v{} starting in {} mode", env!("CARGO_PKG_VERSION"), mode);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    match mode {
        Mode::Forward => forward::start(&config, &mut tasks, &shutdown_rx).await?,
        Mode::Router => router::start(&config.router, &mut tasks, &shutdown_rx).await?,
        Mode::Receiver => receiver::start(&config, &mut tasks, &shutdown_rx).await?,
        Mode::Telemetry => telemetry_link::start_standalone(&config.telemetry, &mut tasks, &shutdown_rx).await?,
    }

    info!("Press Ctrl+C to exit");

    let mut failure: Option<anyhow::Error> = None;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        Some(joined) = tasks.join_next() => {
            failure = task_failure(joined);
            info!("Task finished, shutting down...");
        }
    }

    // Receivers may already be gone if every task has finished
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if let Some(e) = task_failure(joined) {
            failure.get_or_insert(e);
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

/// Log and return the error of a finished task, if it failed
fn task_failure(
    joined: std::result::Result<crsf_bridge::error::Result<()>, tokio::task::JoinError>,
) -> Option<anyhow::Error> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!("Task failed: {}", e);
            Some(e.into())
        }
        Err(e) => {
            error!("Task panicked or was cancelled: {}", e);
            Some(e.into())
        }
    }
}
