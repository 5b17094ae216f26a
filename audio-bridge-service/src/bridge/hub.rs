//! The per-session broadcast hub.
//!
//! Each hub is a single task owning the live subscriber map of one session.
//! Membership changes arrive on an unbounded control mailbox, packets on a
//! bounded packet mailbox; one `select!` loop consumes both, control first, so
//! membership and fan-out never race and no lock guards the map.
//!
//! Slow consumers: every subscriber has a bounded queue filled with
//! `try_send`. When a queue is full the packet is dropped for that subscriber
//! only and counted; fan-out to the others continues.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_futures::Instrument;

use super::endpoint::ParticipantEndpoint;
use super::error::{BridgeError, BridgeResult};
use super::packet::{Packet, ParticipantKey, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Capacity of each subscriber's delivery queue.
    pub subscriber_queue_capacity: usize,
    /// Capacity of the shared publish mailbox.
    pub publish_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 64,
            publish_queue_capacity: 256,
        }
    }
}

enum ControlMessage {
    Join {
        key: ParticipantKey,
        endpoint: ParticipantEndpoint,
        respond_to: oneshot::Sender<BridgeResult<()>>,
    },
    Leave {
        key: ParticipantKey,
        respond_to: oneshot::Sender<bool>,
    },
    Members {
        respond_to: oneshot::Sender<BTreeSet<ParticipantKey>>,
    },
}

struct Subscriber {
    queue: mpsc::Sender<Arc<Packet>>,
    endpoint: ParticipantEndpoint,
}

/// Handle to a running hub. Cheap to clone.
#[derive(Clone)]
pub struct SessionHub {
    session: SessionId,
    control: mpsc::UnboundedSender<ControlMessage>,
    packets: mpsc::Sender<Arc<Packet>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    dropped: Arc<AtomicU64>,
}

impl SessionHub {
    pub fn spawn(session: SessionId, settings: HubSettings) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (packets_tx, packets_rx) = mpsc::channel(settings.publish_queue_capacity.max(1));
        let hub = Self {
            session: session.clone(),
            control: control_tx,
            packets: packets_tx,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let hub_loop = HubLoop {
            hub: hub.clone(),
            settings,
            subscribers: HashMap::new(),
        };
        let span = tracing::debug_span!("hub", session = %session);
        hub.tracker
            .spawn(hub_loop.run(control_rx, packets_rx).instrument(span));
        hub
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Registers `endpoint` under `key` and starts its pumps. Joining a
    /// stopped hub stops the endpoint and fails with `HubClosed`.
    pub async fn join(&self, key: ParticipantKey, endpoint: ParticipantEndpoint) -> BridgeResult<()> {
        let (respond_to, response) = oneshot::channel();
        let message = ControlMessage::Join {
            key,
            endpoint,
            respond_to,
        };
        if let Err(mpsc::error::SendError(message)) = self.control.send(message) {
            if let ControlMessage::Join { endpoint, .. } = message {
                endpoint.stop();
            }
            return Err(self.closed());
        }
        response.await.map_err(|_| self.closed())?
    }

    /// Removes `key`, stopping its endpoint. Resolves to whether the key was
    /// present; leaving an unknown key changes nothing.
    pub async fn leave(&self, key: &ParticipantKey) -> BridgeResult<bool> {
        let (respond_to, response) = oneshot::channel();
        self.control
            .send(ControlMessage::Leave {
                key: key.clone(),
                respond_to,
            })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    /// Queues `packet` for fan-out. Waits while the publish mailbox is full.
    pub async fn publish(&self, packet: Packet) -> BridgeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(self.closed());
        }
        self.packets
            .send(Arc::new(packet))
            .await
            .map_err(|_| self.closed())
    }

    /// Keys of the live subscribers as seen by the hub loop.
    pub async fn members(&self) -> BridgeResult<BTreeSet<ParticipantKey>> {
        let (respond_to, response) = oneshot::channel();
        self.control
            .send(ControlMessage::Members { respond_to })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    /// Packets dropped because a subscriber queue was full.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting joins, stops every subscriber, and returns once the
    /// loop and every endpoint pump have exited. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn closed(&self) -> BridgeError {
        BridgeError::HubClosed {
            session: self.session.clone(),
        }
    }
}

struct HubLoop {
    hub: SessionHub,
    settings: HubSettings,
    subscribers: HashMap<ParticipantKey, Subscriber>,
}

impl HubLoop {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<ControlMessage>,
        mut packets: mpsc::Receiver<Arc<Packet>>,
    ) {
        let shutdown = self.hub.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(message) = control.recv() => self.handle(message),
                Some(packet) = packets.recv() => self.fan_out(packet),
            }
        }

        control.close();
        while let Ok(message) = control.try_recv() {
            self.handle(message);
        }
        for (key, subscriber) in self.subscribers.drain() {
            subscriber.endpoint.stop();
            tracing::debug!(key = %key, "subscriber told to leave");
        }
        tracing::info!(
            dropped = self.hub.dropped_packets(),
            "hub stopped"
        );
    }

    fn handle(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Join {
                key,
                endpoint,
                respond_to,
            } => {
                let result = self.join(key, endpoint);
                let _ = respond_to.send(result);
            }
            ControlMessage::Leave { key, respond_to } => {
                let removed = match self.subscribers.remove(&key) {
                    Some(subscriber) => {
                        subscriber.endpoint.stop();
                        tracing::debug!(key = %key, "subscriber left");
                        true
                    }
                    None => false,
                };
                let _ = respond_to.send(removed);
            }
            ControlMessage::Members { respond_to } => {
                let _ = respond_to.send(self.subscribers.keys().cloned().collect());
            }
        }
    }

    fn join(&mut self, key: ParticipantKey, endpoint: ParticipantEndpoint) -> BridgeResult<()> {
        if self.hub.shutdown.is_cancelled() {
            endpoint.stop();
            return Err(self.hub.closed());
        }
        let (queue, queue_rx) = mpsc::channel(self.settings.subscriber_queue_capacity.max(1));
        endpoint.start(self.hub.clone(), queue_rx, &self.hub.tracker);
        if let Some(previous) = self.subscribers.insert(key.clone(), Subscriber { queue, endpoint }) {
            // The registry never joins a key twice; keep the newest endpoint.
            tracing::warn!(key = %key, "replacing existing subscriber");
            previous.endpoint.stop();
        }
        tracing::debug!(key = %key, members = self.subscribers.len(), "subscriber joined");
        Ok(())
    }

    fn fan_out(&self, packet: Arc<Packet>) {
        for (key, subscriber) in &self.subscribers {
            if *key == packet.origin {
                continue;
            }
            match subscriber.queue.try_send(Arc::clone(&packet)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.hub.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "subscriber queue full, packet dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(key = %key, "subscriber queue closed");
                }
            }
        }
    }
}
