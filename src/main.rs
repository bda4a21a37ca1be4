use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use forward_proxy::config::load_config;
use forward_proxy::observability::logging;
use forward_proxy::{ProxyServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "forward-proxy", about = "HTTP forward proxy with upstream pooling")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init(&config.observability);

    tracing::info!(
        config = %args.config.display(),
        sources = config.sources.len(),
        max_connections = config.listener.max_connections,
        "forward-proxy starting"
    );

    let shutdown = Arc::new(Shutdown::new());
    let server = ProxyServer::new(config, Arc::clone(&shutdown));

    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_shutdown.trigger();
    });

    server.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
