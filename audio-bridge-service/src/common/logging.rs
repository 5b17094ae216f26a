use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, layer::SubscriberExt};

use crate::common::app_config::AppConfig;

pub fn setup_tracing_subscriber(config: &AppConfig) -> anyhow::Result<()> {
    let level = LevelFilter::from_level(config.get_log_level());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_filter(level);

    // Only useful when built with RUSTFLAGS="--cfg tokio_unstable".
    let console_layer = config.tokio_console.then(|| {
        console_subscriber::ConsoleLayer::builder()
            .with_default_env()
            .spawn()
    });

    let file_layer = match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(level),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(console_layer)
        .with(stdout_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(registry)?;

    tracing::debug!("Set up tracing subscriber");
    Ok(())
}
