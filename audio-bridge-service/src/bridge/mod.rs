//! Session bridging: per-session hubs, the session registry, participant
//! endpoints and the transports they drive.

use anyhow::Result;
use lib_common_bridge::types::{ControlRequest, ControlResponse, MAX_CONTROL_MESSAGE_LEN};

use crate::app::App;

pub mod control;
pub mod endpoint;
pub mod error;
pub mod hub;
pub mod memory;
pub mod packet;
pub mod quic;
pub mod registry;
pub mod transport;

pub use endpoint::ParticipantEndpoint;
pub use error::{BridgeError, BridgeResult};
pub use hub::{HubSettings, SessionHub};
pub use packet::{Packet, ParticipantKey, SessionId};
pub use registry::{
    ConnectOutcome, DisconnectOutcome, RegistrySettings, SessionIdGenerator, SessionRegistry,
};
pub use transport::{Transport, TransportAcquirer, TransportError};

pub async fn handle_connection(app: &'static App, conn: quinn::Incoming) -> Result<()> {
    let connection = conn.await?;
    let channel = match crate::common::services::handshake::accept_channel(
        &app.directory,
        &connection,
    )
    .await
    {
        Ok(channel) => channel,
        Err(handshake_error) => {
            tracing::warn!("Unable to register channel: {handshake_error}");
            connection.close(0u8.into(), handshake_error.to_string().as_bytes());
            return Err(handshake_error.into());
        }
    };

    tracing::info!(channel = %channel, remote = %connection.remote_address(), "established");

    let served = tokio::select! {
        served = serve_control(app, &connection, &channel) => served,
        _ = app.cancellation_token.cancelled() => {
            tracing::debug!("Shutting down connection with {}", connection.remote_address());
            connection.close(1u32.into(), b"server shutdown");
            Ok(())
        }
    };

    app.directory.remove(&channel, connection.stable_id());
    let left = app
        .registry
        .disconnect_everywhere(&ParticipantKey::new(channel.as_str()))
        .await;
    tracing::info!(channel = %channel, sessions_left = left.len(), "channel gone");
    served
}

/// Answers control requests, one per bidirectional stream, until the client
/// goes away.
async fn serve_control(
    app: &'static App,
    connection: &quinn::Connection,
    channel: &str,
) -> Result<()> {
    loop {
        let (mut send, mut recv) = match connection.accept_bi().await {
            Ok(streams) => streams,
            Err(quinn::ConnectionError::ApplicationClosed(frame)) => {
                tracing::info!("connection closed: {}", frame);
                return Ok(());
            }
            Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let raw = recv.read_to_end(MAX_CONTROL_MESSAGE_LEN).await?;
        let response = match serde_json::from_slice::<ControlRequest>(&raw) {
            Ok(request) => control::dispatch(&app.registry, channel, request).await,
            Err(e) => {
                tracing::debug!(channel, "malformed control request: {e}");
                ControlResponse::failed("Invalid command. Send help for a list of commands")
            }
        };
        send.write_all(&serde_json::to_vec(&response)?).await?;
        send.finish()?;
    }
}
