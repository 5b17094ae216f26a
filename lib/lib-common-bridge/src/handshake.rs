use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Bytes the service writes back once a channel has been registered.
pub const HANDSHAKE_ACK: &[u8] = b"OK";

/// Upper bound for the hello payload read from the first stream.
pub const MAX_HELLO_LEN: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, Error, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum HandshakeError {
    NoHelloReceived,
    InvalidHelloReceived,
    ChannelInUse,
    AckFailed,
}

/// First message of every bridge client: names the external channel this
/// connection carries audio for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    pub channel: String,
}

impl HelloRequest {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// A channel name must carry at least one non-whitespace character.
    pub fn is_valid(&self) -> bool {
        !self.channel.trim().is_empty()
    }
}
