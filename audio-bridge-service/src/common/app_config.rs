use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs::File, net::SocketAddr};

use clap_serde_derive::{
    ClapSerde,
    clap::{self, Parser},
};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::bridge::{HubSettings, RegistrySettings};

#[cfg(test)]
pub const CONFIG_PATH_ENV: &str = "TEST_CONFIG_PATH";

#[cfg(not(test))]
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG_PATH";

/// Configuration for the app.
#[derive(Parser, Deserialize, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct AppConfigArgs {
    /// stdin input (unused)
    pub input: Option<Vec<String>>,

    /// Path pointing to config.yaml
    #[clap(long = "config", default_value = "config.yaml")]
    pub config_path: std::path::PathBuf,

    #[command(flatten)]
    pub config: <AppConfig as ClapSerde>::Opt,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, derive_more::FromStr, PartialEq)]
#[from_str(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

#[derive(ClapSerde, Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[clap(short = 'e', long = "environment")]
    pub environment: Environment,

    /// TLS private key in PEM or DER format
    #[clap(short = 'k', long = "key", requires = "cert")]
    pub key: PathBuf,
    /// TLS certificate in PEM or DER format
    #[clap(short = 'c', long = "cert", requires = "key")]
    pub cert: PathBuf,

    /// Address to listen on
    #[clap(long = "listen")]
    #[default(SocketAddr::from(([127, 0, 0, 1], 4433)))]
    pub listen: SocketAddr,

    /// Maximum number of concurrent connections to allow
    #[clap(long = "connection-limit")]
    #[default(50)]
    pub connection_limit: usize,

    #[clap(short, long)]
    pub log_level: String,

    /// Extra log file; empty disables it
    #[clap(long = "log-file")]
    pub log_file: PathBuf,

    /// Publish task data for tokio-console
    #[clap(long = "tokio-console")]
    pub tokio_console: bool,

    /// Frames buffered per participant before frames are dropped for it
    #[clap(long = "subscriber-queue-capacity")]
    #[default(64)]
    pub subscriber_queue_capacity: usize,

    /// Frames buffered between participants and their session hub
    #[clap(long = "publish-queue-capacity")]
    #[default(256)]
    pub publish_queue_capacity: usize,

    /// Attempts a membership change makes under contention before giving up
    #[clap(long = "max-update-retries")]
    #[default(64)]
    pub max_update_retries: usize,

    /// Seconds a session may stay empty before it is removed; 0 keeps them
    #[clap(long = "empty-session-ttl-secs")]
    #[default(300)]
    pub empty_session_ttl_secs: u64,
}

impl std::fmt::Debug for ClapSerdeOptionalAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClapSerdeOptionalConfig")
            .field("environment", &self.environment)
            .field("key", &self.key)
            .field("cert", &self.cert)
            .field("listen", &self.listen)
            .field("connection_limit", &self.connection_limit)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .field("tokio_console", &self.tokio_console)
            .field("subscriber_queue_capacity", &self.subscriber_queue_capacity)
            .field("publish_queue_capacity", &self.publish_queue_capacity)
            .field("max_update_retries", &self.max_update_retries)
            .field("empty_session_ttl_secs", &self.empty_session_ttl_secs)
            .finish()
    }
}
/// derive doesn't reach the generated struct, so Clone is spelled out
impl Clone for ClapSerdeOptionalAppConfig {
    fn clone(&self) -> Self {
        Self {
            environment: self.environment,
            key: self.key.clone(),
            cert: self.cert.clone(),
            listen: self.listen,
            connection_limit: self.connection_limit,
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
            tokio_console: self.tokio_console,
            subscriber_queue_capacity: self.subscriber_queue_capacity,
            publish_queue_capacity: self.publish_queue_capacity,
            max_update_retries: self.max_update_retries,
            empty_session_ttl_secs: self.empty_session_ttl_secs,
        }
    }
}

impl AppConfig {
    /// Config takes priority from:
    /// 1. CLI commands (eg. --connection-limit 10) will always be 10 despite config.yaml saying otherwise
    /// 2. YAML config from ENV BRIDGE_CONFIG_PATH
    /// 3. YAML config from CLI if no env is provided (--config)
    /// 4. Default config YAML file - ./config.yaml
    pub fn new() -> anyhow::Result<Self> {
        // Parse from real CLI args + env
        let mut args = AppConfigArgs::try_parse()?;
        Self::from_args(&mut args)
    }
    /// Testable constructor: accepts a pre-built AppConfigArgs so tests
    /// can bypass real CLI parsing.
    pub fn from_args(args: &mut AppConfigArgs) -> anyhow::Result<Self> {
        // Environment variable overrides the --config flag
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            args.config_path = path.into();
        }
        let f = File::open(&args.config_path)?;
        let file_config = serde_yaml::from_reader::<_, AppConfig>(BufReader::new(f))?;
        Ok(file_config.merge(&mut args.config))
    }
    pub fn get_log_level(&self) -> Level {
        match self.log_level.as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
    pub fn log_file(&self) -> Option<&std::path::Path> {
        if self.log_file.as_os_str().is_empty() {
            None
        } else {
            Some(&self.log_file)
        }
    }
    pub fn empty_session_ttl(&self) -> Option<Duration> {
        (self.empty_session_ttl_secs > 0).then(|| Duration::from_secs(self.empty_session_ttl_secs))
    }
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            hub: HubSettings {
                subscriber_queue_capacity: self.subscriber_queue_capacity,
                publish_queue_capacity: self.publish_queue_capacity,
            },
            max_update_retries: self.max_update_retries,
        }
    }
}
