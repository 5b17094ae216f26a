//! Seam between the bridge core and whatever physically moves audio frames.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::{Display, Error};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum TransportError {
    #[display("no channel available at {locator}: {reason}")]
    Unavailable { locator: String, reason: String },
    #[display("transport closed")]
    Closed,
    #[display("send failed: {reason}")]
    Send { reason: String },
}

/// One external audio channel. Receive and send may be driven from different
/// tasks at the same time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Next inbound frame, `None` once the channel is closed.
    async fn recv(&self) -> Option<Bytes>;

    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Releases the channel. Calling it more than once is harmless.
    fn close(&self);
}

/// Attaches to the external channel named by `locator`. May be slow.
#[async_trait]
pub trait TransportAcquirer: Send + Sync {
    async fn acquire(&self, locator: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
