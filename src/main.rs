use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tideway::cache::MemoryStore;
use tideway::config::watcher::ConfigWatcher;
use tideway::config::load_or_default;
use tideway::lifecycle::{spawn_signal_handler, Shutdown};
use tideway::observability::{logging, metrics};
use tideway::{HttpServer, Orchestrator};

#[derive(Parser)]
#[command(name = "tideway")]
#[command(about = "Resilient orchestration hub for weather, tide and routing workers", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tideway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        call_timeout_ms = config.timeouts.call_ms,
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    if config.observability.prometheus_enabled {
        match config.observability.prometheus_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_prometheus(addr) {
                    tracing::error!(error = %e, "Failed to start Prometheus exporter");
                }
            }
            Err(_) => tracing::error!(
                prometheus_address = %config.observability.prometheus_address,
                "Failed to parse Prometheus address"
            ),
        }
    }

    // keep the watcher handle alive for the life of the process
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (mpsc::unbounded_channel().1, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(Orchestrator::new(&config, store));
    let background = orchestrator.start_background(&shutdown);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(&config, orchestrator, shutdown.clone())
        .run(listener, config_updates)
        .await?;

    shutdown.trigger();
    for handle in background {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
