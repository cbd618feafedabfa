//! canvasd - Tile Canvas event log and discovery daemon
//!
//! Wires a Tile Store and a Discovery Graph behind the config and logging
//! conventions of the spec's daemon shell (§4.9).

mod config;
mod daemon;

use clap::Parser;
use config::Config;
use daemon::Daemon;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("canvasd={default_level}").parse().unwrap());

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if let Err(err) = config.validate() {
        error!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    info!("canvasd v{} starting", env!("CARGO_PKG_VERSION"));

    let daemon = match Daemon::new(&config).await {
        Ok(daemon) => daemon,
        Err(err) => {
            error!("failed to initialize daemon: {err}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_handle = daemon.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_handle.send(());
    });

    if let Err(err) = daemon.run().await {
        error!("daemon error: {err}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
