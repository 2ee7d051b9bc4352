//! Sluice Uploadr - streaming multipart upload receiver
//!
//! Stores uploaded files on local disk and reports each upload to a chat.

use clap::{Parser, ValueEnum};
use sluice_uploadr::config::{Config, ServerConfig};
use sluice_uploadr::metrics::server::MetricsEndpoint;
use sluice_uploadr::server::Server;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Sluice Uploadr - stream multipart uploads to disk with chat notifications
#[derive(Parser, Debug)]
#[command(name = "sluice-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; built-in defaults apply without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Storage directory, overrides storage.root
    #[arg(short, long)]
    storage_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    match args.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    info!("Starting Sluice Uploadr v{}", sluice_uploadr::VERSION);

    // Load configuration
    let mut config = match args.config {
        Some(ref path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.storage_root {
        config.storage.root = root;
    }
    config.validate()?;

    // Metrics endpoint runs beside the upload listener
    let mut metrics_stop = None;
    if config.metrics.enabled {
        let listen = ServerConfig {
            port: config.metrics.port,
            ..config.server.clone()
        };
        let endpoint = MetricsEndpoint::bind(&listen.address()).await?;
        info!("Metrics available at http://{}/metrics", endpoint.local_addr());

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(endpoint.serve_until(async {
            let _ = stop_rx.await;
        }));
        metrics_stop = Some((stop_tx, task));
    }

    // Start server
    let server = Server::new(config).await?;
    server.run().await?;

    if let Some((stop_tx, task)) = metrics_stop {
        let _ = stop_tx.send(());
        let _ = task.await;
    }

    Ok(())
}
