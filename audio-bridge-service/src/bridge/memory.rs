//! In-process transports. Each channel is a pair: the [`MemoryTransport`] half
//! is handed to the bridge, the [`MemoryPeer`] half plays the remote side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::transport::{Transport, TransportAcquirer, TransportError};

pub struct MemoryTransport {
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
}

pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Bytes>,
    outbound: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    closed: CancellationToken,
}

pub fn memory_pair() -> (Arc<MemoryTransport>, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    let transport = MemoryTransport {
        inbound: AsyncMutex::new(inbound_rx),
        outbound: outbound_tx,
        closed: closed.clone(),
    };
    let peer = MemoryPeer {
        inbound: inbound_tx,
        outbound: AsyncMutex::new(outbound_rx),
        closed,
    };
    (Arc::new(transport), peer)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&self) -> Option<Bytes> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = inbound.recv() => frame,
        }
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

impl MemoryPeer {
    /// Injects a frame as if the remote side had spoken. Returns false once
    /// the bridge side is gone.
    pub fn speak(&self, frame: impl Into<Bytes>) -> bool {
        !self.closed.is_cancelled() && self.inbound.send(frame.into()).is_ok()
    }

    /// Next frame the bridge delivered to this channel, if one arrives within `wait`.
    pub async fn heard(&self, wait: Duration) -> Option<Bytes> {
        let mut outbound = self.outbound.lock().await;
        tokio::time::timeout(wait, outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the bridge released the transport.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Acquirer over memory channels opened ahead of time. Acquiring takes the
/// channel, so each one can be bridged at most once.
#[derive(Default)]
pub struct MemoryChannels {
    pending: Mutex<HashMap<String, Arc<MemoryTransport>>>,
    acquisitions: AtomicUsize,
    delay: Duration,
}

impl MemoryChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition sleeps this long before answering.
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn open(&self, locator: impl Into<String>) -> MemoryPeer {
        let (transport, peer) = memory_pair();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.into(), transport);
        peer
    }

    /// Number of successful acquisitions so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportAcquirer for MemoryChannels {
    async fn acquire(&self, locator: &str) -> Result<Arc<dyn Transport>, TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let transport = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator)
            .ok_or_else(|| TransportError::Unavailable {
                locator: locator.to_owned(),
                reason: "channel not open".into(),
            })?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (transport, peer) = memory_pair();

        assert!(peer.speak(&b"ping"[..]));
        assert_eq!(transport.recv().await, Some(Bytes::from_static(b"ping")));

        transport.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(
            peer.heard(Duration::from_millis(100)).await,
            Some(Bytes::from_static(b"pong"))
        );
    }

    #[tokio::test]
    async fn close_ends_recv_and_rejects_send() {
        let (transport, peer) = memory_pair();
        transport.close();
        transport.close();

        tokio::time::timeout(Duration::from_millis(100), peer.closed())
            .await
            .expect("closing the transport should release the peer");
        assert!(peer.is_closed());
        assert_eq!(transport.recv().await, None);
        assert_eq!(
            transport.send(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        );
        assert!(!peer.speak(&b"late"[..]));
    }

    #[tokio::test]
    async fn channels_are_acquired_once() {
        let channels = MemoryChannels::new();
        let _peer = channels.open("guild-1");

        assert!(channels.acquire("guild-1").await.is_ok());
        let second = channels.acquire("guild-1").await;
        assert!(matches!(second, Err(TransportError::Unavailable { .. })));
        assert_eq!(channels.acquisitions(), 1);
    }
}
