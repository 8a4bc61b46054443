//! Relay server binary.
//!
//! Runs the HTTP ingest API, the retention task and, unless disabled, the
//! consumer dispatcher in one process:
//!
//! ```bash
//! relay-server --config relay.toml
//! relay-server --listen-addr 0.0.0.0:8080 --partitions 8 --group audit
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use relay_server::tasks::{spawn_retention, start_dispatcher};
use relay_server::{router, RelayConfig, RelayService};

/// Relay event log server.
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on for HTTP requests.
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<Level>,

    /// Number of partitions.
    #[arg(long)]
    partitions: Option<u32>,

    /// Consumer group of the in-process dispatcher.
    #[arg(long)]
    group: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(addr) = self.listen_addr {
            config.server.listen_addr = addr;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level.to_string();
        }
        if let Some(partitions) = self.partitions {
            config.log.partitions = partitions;
        }
        if let Some(group) = &self.group {
            config.consumer.group.clone_from(group);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    args.apply(&mut config);

    let level: Level = config.server.log_level.parse()?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        listen_addr = %config.server.listen_addr,
        partitions = config.log.partitions,
        consumer = config.consumer.enabled,
        group = %config.consumer.group,
        "Starting relay server"
    );

    let service = RelayService::open(&config).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let retention = spawn_retention(
        std::sync::Arc::clone(service.log()),
        config.retention_interval(),
        stop_rx,
    );

    let dispatcher = if config.consumer.enabled {
        Some(start_dispatcher(&config, &service).await?)
    } else {
        None
    };

    let listener = TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "HTTP server listening");
    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    stop_tx.send_replace(true);
    retention.await?;
    if let Some(handle) = dispatcher {
        let states = handle.shutdown().await;
        info!(workers = states.len(), "Dispatcher stopped");
    }
    service.checkpoints().sync().await?;

    info!("Relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
