//! # letmeknow
//!
//! Notification relay binary: parses flags, sets up logging and metrics, and
//! serves the `WebSocket` relay until Ctrl-C.

#![deny(unsafe_code)]

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use letmeknow_server::config::{FanoutPolicy, ServerConfig};
use letmeknow_server::server::{RelayServer, WS_PATH};
use letmeknow_server::shutdown::DrainOutcome;
use letmeknow_server::{logging, metrics};

/// letmeknow notification relay.
#[derive(Parser, Debug)]
#[command(name = "letmeknow", about = "Real-time notification relay over WebSocket")]
struct Cli {
    /// HTTP service address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Log level filter (overridden by `RUST_LOG`).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// What a fan-out does when one recipient cannot be written to
    /// (`fail-fast` or `best-effort`).
    #[arg(long, default_value = "fail-fast")]
    fanout_policy: FanoutPolicy,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            fanout_policy: self.fanout_policy,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level, args.log_json);

    let metrics_handle = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let server = RelayServer::new(args.server_config()).with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        fanout_policy = %server.config().fanout_policy,
        "letmeknow listening on ws://{addr}{WS_PATH}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    match server.shutdown().drain(handle, None).await {
        DrainOutcome::Clean => tracing::info!("Shutdown complete"),
        DrainOutcome::TimedOut { sessions_left } => {
            tracing::warn!(sessions_left, "Shutdown timed out");
        }
    }
    Ok(())
}
