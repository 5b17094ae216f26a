use lib_common_bridge::types::{HANDSHAKE_ACK, HandshakeError, HelloRequest, MAX_HELLO_LEN};

use crate::bridge::quic::ChannelDirectory;

/// Reads the client's hello from its first bidirectional stream and registers
/// the connection under the announced channel. Returns the channel name.
pub async fn accept_channel(
    directory: &ChannelDirectory,
    connection: &quinn::Connection,
) -> Result<String, HandshakeError> {
    let (mut send, mut recv) = connection
        .accept_bi()
        .await
        .map_err(|_| HandshakeError::NoHelloReceived)?;

    let hello = recv
        .read_to_end(MAX_HELLO_LEN)
        .await
        .map_err(|_| HandshakeError::InvalidHelloReceived)?; // too long - invalid request

    tracing::debug!(
        "Hello payload from {}: {:?}",
        connection.remote_address(),
        String::from_utf8_lossy(&hello)
    );
    let hello = serde_json::from_slice::<HelloRequest>(&hello)
        .map_err(|_| HandshakeError::InvalidHelloReceived)?;
    if !hello.is_valid() {
        return Err(HandshakeError::InvalidHelloReceived);
    }

    directory.register(&hello.channel, connection.clone())?;
    let acked = match send.write_all(HANDSHAKE_ACK).await {
        Ok(()) => send.finish().is_ok(),
        Err(_) => false,
    };
    if !acked {
        directory.remove(&hello.channel, connection.stable_id());
        return Err(HandshakeError::AckFailed);
    }

    tracing::info!(channel = %hello.channel, "channel registered");
    Ok(hello.channel)
}
