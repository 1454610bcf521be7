//! etcd-autobind binary entry point.

use clap::Parser;
use etcd_autobind::pidfile::PidFile;
use etcd_autobind::{telemetry, Config, SyncAgent};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Keeps BIND zone files in sync with host records stored in etcd.
#[derive(Parser, Debug)]
#[command(name = "etcd-autobind")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "etcd-autobind.toml")]
    config: PathBuf,
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("AUTOBIND")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("etcd.endpoints")
                .with_list_parse_key("named.check_command")
                .with_list_parse_key("named.reload_command")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    let _telemetry =
        telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        endpoints = ?config.etcd.endpoints,
        prefix = %config.etcd.prefix,
        zone_dir = %config.sync.zone_dir.display(),
        "Starting etcd-autobind"
    );

    let pid_file = PidFile::acquire(&config.sync.pid_file)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let result = match SyncAgent::from_config(&config) {
        Ok(agent) => agent.run(shutdown).await,
        Err(e) => Err(e),
    };

    if let Err(e) = pid_file.release() {
        warn!(error = %e, "failed to remove pid file");
    }

    if let Err(e) = result {
        error!(error = %e, "etcd-autobind stopped on fatal error");
        return Err(e.into());
    }

    info!("etcd-autobind shutdown complete");
    Ok(())
}
