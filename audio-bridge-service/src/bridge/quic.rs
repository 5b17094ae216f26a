//! QUIC-backed transports. A connected bridge client registers its channel in
//! the [`ChannelDirectory`]; bridging that channel into a session attaches a
//! [`QuicTransport`] that carries audio frames as datagrams.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use lib_common_bridge::types::HandshakeError;
use quinn::{Connection, SendDatagramError};
use tokio_util::sync::CancellationToken;

use super::transport::{Transport, TransportAcquirer, TransportError};

struct ChannelSlot {
    connection: Connection,
    attached: bool,
}

/// Channels of the currently connected clients, keyed by channel name.
#[derive(Clone, Default)]
pub struct ChannelDirectory {
    channels: Arc<Mutex<HashMap<String, ChannelSlot>>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: &str, connection: Connection) -> Result<(), HandshakeError> {
        let mut channels = self.lock();
        if channels.contains_key(channel) {
            return Err(HandshakeError::ChannelInUse);
        }
        channels.insert(
            channel.to_owned(),
            ChannelSlot {
                connection,
                attached: false,
            },
        );
        Ok(())
    }

    /// Forgets `channel` if it still belongs to the connection `stable_id`.
    pub fn remove(&self, channel: &str, stable_id: usize) {
        let mut channels = self.lock();
        if channels
            .get(channel)
            .is_some_and(|slot| slot.connection.stable_id() == stable_id)
        {
            channels.remove(channel);
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.lock().contains_key(channel)
    }

    pub fn is_attached(&self, channel: &str) -> bool {
        self.lock().get(channel).is_some_and(|slot| slot.attached)
    }

    fn detach(&self, channel: &str, stable_id: usize) {
        if let Some(slot) = self.lock().get_mut(channel) {
            if slot.connection.stable_id() == stable_id {
                slot.attached = false;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelSlot>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportAcquirer for ChannelDirectory {
    async fn acquire(&self, locator: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let mut channels = self.lock();
        let slot = channels
            .get_mut(locator)
            .ok_or_else(|| TransportError::Unavailable {
                locator: locator.to_owned(),
                reason: "channel is not connected".into(),
            })?;
        if slot.attached {
            return Err(TransportError::Unavailable {
                locator: locator.to_owned(),
                reason: "channel is already bridged".into(),
            });
        }
        slot.attached = true;
        tracing::debug!(channel = locator, remote = %slot.connection.remote_address(), "channel attached");
        Ok(Arc::new(QuicTransport {
            channel: locator.to_owned(),
            connection: slot.connection.clone(),
            directory: self.clone(),
            closed: CancellationToken::new(),
        }))
    }
}

pub struct QuicTransport {
    channel: String,
    connection: Connection,
    directory: ChannelDirectory,
    closed: CancellationToken,
}

#[async_trait]
impl Transport for QuicTransport {
    async fn recv(&self) -> Option<Bytes> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            read = self.connection.read_datagram() => match read {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::debug!(channel = %self.channel, "datagram stream ended: {e}");
                    None
                }
            },
        }
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.connection.send_datagram(frame).map_err(|e| match e {
            SendDatagramError::ConnectionLost(_) => TransportError::Closed,
            other => TransportError::Send {
                reason: other.to_string(),
            },
        })
    }

    /// Detaches the channel from its session. The client stays connected and
    /// may be bridged again.
    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.directory
            .detach(&self.channel, self.connection.stable_id());
        tracing::debug!(channel = %self.channel, "channel detached");
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.close();
    }
}
