use std::sync::Arc;
use std::time::Duration;

use crate::bridge::SessionRegistry;
use crate::bridge::quic::ChannelDirectory;
use crate::common::app_config::AppConfig;

use quinn::Endpoint;
use tokio::signal::{self};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
pub struct App {
    ///Readonly config
    pub config: AppConfig,
    /// Token notifying of app shutdown
    pub cancellation_token: CancellationToken,
    /// Sessions and their hubs
    pub registry: SessionRegistry,
    /// Channels of the connected clients
    pub directory: ChannelDirectory,
    /// Task tracker. Instead of using tokio::spawn use tracker.spawn
    task_tracker: TaskTracker,
}

impl App {
    pub fn new(config: AppConfig) -> &'static mut Self {
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let directory = ChannelDirectory::new();
        let registry =
            SessionRegistry::new(Arc::new(directory.clone()), config.registry_settings());
        let app = Box::new(Self {
            config,
            cancellation_token,
            registry,
            directory,
            task_tracker,
        });
        Box::leak(app)
    }
    pub async fn run(&'static self) -> anyhow::Result<()> {
        let endpoint = self.create_endpoint()?;
        tracing::info!("listening on {}", endpoint.local_addr()?);
        tokio::spawn(self.serve(endpoint));
        if let Some(ttl) = self.config.empty_session_ttl() {
            self.task_tracker.spawn(self.reap_empty_sessions(ttl));
        }
        self.handle_signal().await;
        self.shutdown().await;
        Ok(())
    }
    /// Accepts connections until the cancellation token fires.
    pub async fn serve(&'static self, endpoint: Endpoint) {
        let connection_limit = self.config.connection_limit;

        loop {
            tokio::select! {
                Some(conn) = endpoint.accept() => {
                    if endpoint.open_connections() >= connection_limit {
                        tracing::debug!("refusing due to open connection limit");
                        conn.refuse();
                    } else if !conn.remote_address_validated() {
                        tracing::debug!("requiring connection to validate its address");
                        if let Err(e) = conn.retry() {
                            tracing::debug!("retry not possible: {e}");
                        }
                    } else {
                        tracing::info!("Accepted connection");
                        let fut = crate::bridge::handle_connection(self, conn);
                        self.task_tracker.spawn(async move {
                            if let Err(e) = fut.await {
                                tracing::error!("connection failed: {reason}", reason = e.to_string())
                            }
                        });
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Stopping receiving new connections.");
                    break;
                }
            }
        }
    }
    /// Periodically removes sessions nobody joined within `ttl`.
    pub async fn reap_empty_sessions(&'static self, ttl: Duration) {
        let mut interval = tokio::time::interval((ttl / 2).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.registry.reap_empty_sessions(ttl).await;
                    if reaped > 0 {
                        tracing::info!(reaped, "removed sessions nobody joined");
                    }
                },
                _ = self.cancellation_token.cancelled() => break,
            }
        }
    }
    /// Cancels every connection, waits for them to finish and tears down the
    /// remaining sessions.
    pub async fn shutdown(&'static self) {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        self.registry.teardown_all().await;
        tracing::info!("All sessions torn down");
    }
    pub fn create_endpoint(&'static self) -> anyhow::Result<Endpoint> {
        let (certs, key) = crate::common::security::certs::load_identity(&self.config)?;
        let server_config = crate::common::security::endpoint_config::create_server_config(
            &self.config,
            certs,
            key,
        )?;

        Ok(quinn::Endpoint::server(server_config, self.config.listen)?)
    }

    async fn handle_signal(&'static self) {
        match signal::ctrl_c().await {
            Ok(_) => {
                tracing::info!("Interrupt detected!");
                self.cancellation_token.cancel();
                tracing::info!("Sent exit signal. Waiting for jobs to finish...");
            }
            Err(e) => {
                tracing::error!("Cannot listen for interrupt, app closing: {e}");
            }
        }
    }
}
