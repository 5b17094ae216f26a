//! Voice bridge server: relays audio datagrams between the channels bridged
//! into the same session.

use anyhow::{Result, anyhow};
use audio_bridge_service::app::App;
use audio_bridge_service::common::app_config::AppConfig;
use audio_bridge_service::common::logging::setup_tracing_subscriber;
use rustls::crypto;

fn main() {
    let code = {
        if let Err(e) = start() {
            eprintln!("ERROR: {e:#}");
            1
        } else {
            0
        }
    };
    ::std::process::exit(code);
}

fn start() -> Result<()> {
    crypto::CryptoProvider::install_default(crypto::aws_lc_rs::default_provider())
        .map_err(|_| anyhow!("a crypto provider was already installed"))?;
    let config = AppConfig::new()?;
    setup_tracing_subscriber(&config)?;
    tracing::debug!("Loaded config: {:?}", config);
    run(config)
}

#[tokio::main]
async fn run(config: AppConfig) -> Result<()> {
    let app = App::new(config);
    app.run().await
}
