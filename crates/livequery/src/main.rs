//! # livequery
//!
//! Serves the posts demo over HTTP, with live updates on `/ws`.

#![deny(unsafe_code)]

mod posts;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use livequery_server::{LiveQueryServer, ServerConfig};
use livequery_settings::LiveQuerySettings;

use crate::posts::{PostStore, Viewer};

/// Live-query server.
#[derive(Parser, Debug)]
#[command(name = "livequery", about = "Live-query server with invalidation fan-out")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.livequery/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Updates per batched broadcast (overrides settings).
    #[arg(long)]
    max_batch_size: Option<usize>,
}

impl Cli {
    fn apply(&self, settings: &mut LiveQuerySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(size) = self.max_batch_size {
            settings.engine.max_batch_size = size;
        }
    }
}

fn server_config(settings: &LiveQuerySettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_body_bytes: settings.server.max_body_bytes,
        subscriber_buffer: settings.server.subscriber_buffer,
        max_batch_size: settings.engine.max_batch_size,
        engine: settings.engine.engine_config(),
    }
}

fn load_settings(cli: &Cli) -> Result<LiveQuerySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(livequery_settings::settings_path);
    let mut settings = livequery_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let logging = settings
        .logging
        .logging_config()
        .context("Invalid logging settings")?;
    livequery_logging::init_logging(&logging).context("Failed to initialize logging")?;

    let metrics = livequery_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let store = Arc::new(PostStore::default());
    let registry = posts::registry(store).context("Failed to build registry")?;
    let query_count = registry.query_names().len();
    let mutation_count = registry.mutation_names().len();

    let server = LiveQueryServer::new(server_config(&settings), registry, Viewer::from_headers)
        .with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        queries = query_count,
        mutations = mutation_count,
        max_batch_size = settings.engine.max_batch_size,
        "livequery listening on http://{}",
        handle.addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown(handle, None).await {
        tracing::warn!("fan-outs still running at exit");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
