use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rayport_daemon::config::DaemonConfig;
use rayport_daemon::engine::{Engine, MemoryEngine};
use rayport_daemon::{entrypoints, server};
use tokio::net::TcpListener;

/// Remote control port for the rayport rendering service.
#[derive(Parser, Debug)]
#[command(name = "rayportd", version, about)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let default_filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(&config.engine));
    let version = engine.version();
    let dispatcher = Arc::new(entrypoints::build_dispatcher(engine, &config.engine));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    log::info!("rayportd {} listening on ws://{}", version.version, config.listen);
    server::serve(listener, dispatcher).await.context("accept loop failed")
}
