mod app;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    sync::Arc,
};

use sliptalk_core::{
    config::{self, AppConfig},
    FileStore, GameStore, GeminiSource, RetryPolicy,
};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    config::ensure_default_config()?;
    let config = AppConfig::load()?;
    info!(data_dir = %config.data_dir.display(), model = %config.model, "starting sliptalk");

    let storage = Arc::new(FileStore::new(config.data_dir.clone()));
    let store = GameStore::open(storage);
    let source = GeminiSource::from_config(&config).context("failed to build API client")?;
    let policy = RetryPolicy::from_config(&config);

    let mut app = app::SlipTalkApp::new(store, Arc::new(source), policy);
    app.run().await
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("sliptalk.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
