//! Turns control requests from a connected channel into registry calls and
//! acknowledgements.

use lib_common_bridge::types::{ControlRequest, ControlResponse};

use super::error::BridgeError;
use super::packet::{ParticipantKey, SessionId};
use super::registry::{ConnectOutcome, DisconnectOutcome, SessionRegistry};

pub const HELP_TEXT: &str = "List of commands:\n\
    help - prints this message\n\
    start - generates a unique session id to be used when bridging\n\
    connect <session id> - connects your channel to the session and begins the bridge\n\
    disconnect <session id> - disconnects your channel from the session";

/// Handles one request issued by the client owning `channel`. The channel
/// name is both the participant key and the transport locator.
pub async fn dispatch(
    registry: &SessionRegistry,
    channel: &str,
    request: ControlRequest,
) -> ControlResponse {
    tracing::debug!(channel, ?request, "control request");
    match request {
        ControlRequest::Help => ControlResponse::ok(HELP_TEXT),
        ControlRequest::Start => match registry.create_session().await {
            Ok(session) => ControlResponse::ok(format!("Session id generated: {session}"))
                .with_session(session.as_str()),
            Err(BridgeError::DuplicateId { .. }) => {
                ControlResponse::failed("Generated unique id already exists, try again")
            }
            Err(e) => failure(e),
        },
        ControlRequest::Connect { session_id } => {
            let session = SessionId::new(session_id);
            let key = ParticipantKey::new(channel);
            match registry.connect_participant(&session, &key, channel).await {
                Ok(ConnectOutcome::Joined) => {
                    ControlResponse::ok(format!("Bridging {channel} into session {session}"))
                        .with_session(session.as_str())
                }
                Ok(ConnectOutcome::AlreadyMember) => {
                    ControlResponse::ok(format!("{channel} is already bridged into session {session}"))
                        .with_session(session.as_str())
                }
                Err(BridgeError::TransportUnavailable { .. }) => {
                    ControlResponse::failed(format!("{channel} is not available for bridging"))
                }
                Err(e) => failure(e),
            }
        }
        ControlRequest::Disconnect { session_id } => {
            let session = SessionId::new(session_id);
            let key = ParticipantKey::new(channel);
            match registry.disconnect_participant(&session, &key).await {
                Ok(DisconnectOutcome::Left { remaining }) => ControlResponse::ok(format!(
                    "Disconnected from session {session}, {remaining} client(s) remain"
                )),
                Ok(DisconnectOutcome::SessionClosed) => ControlResponse::ok(
                    "This was the last client in the session. Terminating session. \
                     You must create a new session if you want to use the bridge again.",
                ),
                Err(e) => failure(e),
            }
        }
    }
}

fn failure(error: BridgeError) -> ControlResponse {
    let message = match &error {
        BridgeError::SessionNotFound { .. } => "SessionID not found".to_owned(),
        BridgeError::NotMember { .. } => "Your channel is not part of that session".to_owned(),
        BridgeError::Busy { .. } => "Session is busy, try again".to_owned(),
        BridgeError::InternalInvariantViolation { .. } | BridgeError::HubClosed { .. } => {
            tracing::error!("control request failed: {error}");
            "Internal error".to_owned()
        }
        other => other.to_string(),
    };
    ControlResponse::failed(message)
}
