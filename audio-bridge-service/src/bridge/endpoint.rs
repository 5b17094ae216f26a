//! A participant endpoint bridges one external transport into its session hub.
//!
//! Two pumps run per endpoint: inbound (transport -> hub) and outbound
//! (subscriber queue -> transport). Both watch the endpoint's stop token, so
//! stopping never waits on a blocked publish or a pending write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_futures::Instrument;

use super::hub::SessionHub;
use super::packet::{Packet, ParticipantKey, SessionId};
use super::transport::{Transport, TransportError};

pub struct ParticipantEndpoint {
    key: ParticipantKey,
    session: SessionId,
    transport: Arc<dyn Transport>,
    stop_token: CancellationToken,
    stopped: AtomicBool,
}

impl ParticipantEndpoint {
    pub fn new(session: SessionId, key: ParticipantKey, transport: Arc<dyn Transport>) -> Self {
        Self {
            key,
            session,
            transport,
            stop_token: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ParticipantKey {
        &self.key
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Spawns both pumps on `tracker`. Called by the hub once the endpoint
    /// has a subscriber queue.
    pub(crate) fn start(
        &self,
        hub: SessionHub,
        queue: mpsc::Receiver<Arc<Packet>>,
        tracker: &TaskTracker,
    ) {
        let span = tracing::debug_span!("endpoint", session = %self.session, key = %self.key);
        tracker.spawn(
            inbound_pump(
                self.key.clone(),
                Arc::clone(&self.transport),
                hub,
                self.stop_token.clone(),
            )
            .instrument(span.clone()),
        );
        tracker.spawn(
            outbound_pump(Arc::clone(&self.transport), queue, self.stop_token.clone())
                .instrument(span),
        );
    }

    /// Stops both pumps and releases the transport. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_token.cancel();
        self.transport.close();
        tracing::debug!(session = %self.session, key = %self.key, "endpoint stopped");
    }
}

async fn inbound_pump(
    key: ParticipantKey,
    transport: Arc<dyn Transport>,
    hub: SessionHub,
    stop: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = transport.recv() => match frame {
                Some(frame) => frame,
                None => {
                    tracing::debug!("transport closed, inbound pump done");
                    break;
                }
            },
        };
        let packet = Packet::new(key.clone(), frame);
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            published = hub.publish(packet) => {
                if published.is_err() {
                    tracing::debug!("hub gone, inbound pump done");
                    break;
                }
            }
        }
    }
}

async fn outbound_pump(
    transport: Arc<dyn Transport>,
    mut queue: mpsc::Receiver<Arc<Packet>>,
    stop: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            sent = transport.send(packet.payload.clone()) => match sent {
                Ok(()) => {}
                Err(TransportError::Closed) => {
                    tracing::debug!("transport closed, outbound pump done");
                    break;
                }
                Err(e) => tracing::warn!("dropping frame: {e}"),
            }
        }
    }
}
