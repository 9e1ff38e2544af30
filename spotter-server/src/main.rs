// Spotter: upload an image, get it back with detected objects drawn on it

use anyhow::Context;
use clap::Parser;
use spotter_core::SpotterConfig;
use spotter_server::{create_router, startup};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "spotter-server", version, about = "Object detection over HTTP")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the ONNX model weights
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Directory holding uploads/ and outputs/
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `spotter_eye=debug`
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<SpotterConfig> {
        self.load_config_with(|key| std::env::var(key).ok())
    }

    /// File, then variables from `lookup`, then flags, then validation
    fn load_config_with<F>(&self, lookup: F) -> anyhow::Result<SpotterConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config {
            Some(path) => SpotterConfig::from_file(path)?,
            None => SpotterConfig::default(),
        };
        config.apply_vars(lookup)?;

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(weights) = &self.weights {
            config.model.weights_path = weights.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.storage.static_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    startup::init_tracing(&config.logging)?;

    info!("🚀 Starting Spotter...");
    let addr = config.bind_address();
    let state = startup::build_state(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("✅ Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("👋 Spotter stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received");
}
