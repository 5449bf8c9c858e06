//! Aircheck Server - headless coordination server for an AI-augmented radio.
//!
//! Wraps the coordination core in a long-running daemon: loads configuration,
//! bootstraps the services, serves the HTTP/WS API, and shuts down cleanly on
//! Ctrl+C or SIGTERM.
//!
//! Exit codes: 0 clean shutdown, 64 configuration error, 69 engine
//! unreachable past the startup grace, 74 storage error past the startup
//! grace.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use aircheck_core::{bootstrap_services, start_server, AircheckError, AppState, EngineControl};
use clap::Parser;
use tokio::signal;
use tokio::time::Instant;

use crate::config::ServerConfig;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 64;
const EXIT_ENGINE_UNREACHABLE: u8 = 69;
const EXIT_STORAGE: u8 = 74;

/// Aircheck Server - coordination core for an AI-augmented web radio.
#[derive(Parser, Debug)]
#[command(name = "aircheck-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRCHECK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "AIRCHECK_BIND_PORT")]
    port: Option<u16>,

    /// Data directory; re-roots the database, TTS, and artwork paths.
    #[arg(short = 'd', long, env = "AIRCHECK_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Aircheck Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        log::info!("Using data directory: {}", data_dir.display());
        config.set_data_dir(data_dir);
    }

    let grace_deadline = Instant::now() + Duration::from_secs(config.startup_grace_secs);

    // Bootstrap services; a storage outage is tolerated until the grace
    // deadline, a configuration error never is.
    let services = loop {
        match bootstrap_services(&config.core).await {
            Ok(services) => break services,
            Err(AircheckError::Configuration(e)) => {
                log::error!("Invalid configuration: {}", e);
                return ExitCode::from(EXIT_CONFIG);
            }
            Err(e) => {
                if Instant::now() >= grace_deadline {
                    log::error!("Storage unavailable past startup grace: {}", e);
                    return ExitCode::from(EXIT_STORAGE);
                }
                log::warn!("Bootstrap failed, retrying: {}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    log::info!("Services bootstrapped successfully");

    // Probe the engine within the remaining grace window. Recovery later is
    // the adapter's job (reconnect with backoff); never being reachable at
    // all is an operator error worth failing loudly on.
    loop {
        match services.engine.now().await {
            Ok(_) => break,
            Err(e) => {
                if Instant::now() >= grace_deadline {
                    log::error!("Engine unreachable past startup grace: {}", e);
                    return ExitCode::from(EXIT_ENGINE_UNREACHABLE);
                }
                log::warn!("Engine probe failed, retrying: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    log::info!(
        "Engine reachable at {}:{}",
        config.core.engine.control_host,
        config.core.engine.control_port
    );

    services.start_background_tasks();

    // Build app state for the HTTP server
    let app_state = AppState::builder()
        .from_services(&services)
        .bus_config(config.core.bus.clone())
        .snapshot_config(config.core.snapshot.clone())
        .build();

    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, bind_port).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", bind_port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    ExitCode::from(EXIT_OK)
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
