//! Session registry.
//!
//! Maps session ids to their hub and the registry's view of the membership.
//! Structural changes follow an optimistic protocol: read a snapshot (the
//! session's revision) under the read lock, do slow work such as acquiring a
//! transport without any lock, then take the write lock and commit only if
//! the revision is unchanged. A changed revision means another mutation won
//! the race and the attempt starts over.
//!
//! Invariant: for every session, `members` equals the hub's live subscriber
//! set whenever no mutation is in flight.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::endpoint::ParticipantEndpoint;
use super::error::{BridgeError, BridgeResult};
use super::hub::{HubSettings, SessionHub};
use super::packet::{ParticipantKey, SessionId};
use super::transport::TransportAcquirer;

pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self) -> SessionId;
}

/// Random v4 UUIDs rendered without separators.
pub struct UuidSessionIds;

impl SessionIdGenerator for UuidSessionIds {
    fn generate(&self) -> SessionId {
        SessionId::new(uuid::Uuid::new_v4().simple().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub hub: HubSettings,
    /// Attempts a connect or disconnect makes before giving up with `Busy`.
    pub max_update_retries: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            hub: HubSettings::default(),
            max_update_retries: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Joined,
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Left { remaining: usize },
    /// The last participant left and the session was torn down.
    SessionClosed,
}

struct SessionEntry {
    hub: SessionHub,
    members: BTreeSet<ParticipantKey>,
    revision: u64,
    created: Instant,
}

struct Snapshot {
    revision: u64,
    is_member: bool,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    acquirer: Arc<dyn TransportAcquirer>,
    ids: Box<dyn SessionIdGenerator>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    pub fn new(acquirer: Arc<dyn TransportAcquirer>, settings: RegistrySettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            acquirer,
            ids: Box::new(UuidSessionIds),
            settings,
        }
    }

    pub fn with_id_generator(mut self, ids: impl SessionIdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Creates an empty session with a freshly generated id.
    pub async fn create_session(&self) -> BridgeResult<SessionId> {
        let session = self.ids.generate();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session) {
            tracing::error!(session = %session, "generated session id collides with a live session");
            return Err(BridgeError::DuplicateId { session });
        }
        let hub = SessionHub::spawn(session.clone(), self.settings.hub);
        sessions.insert(
            session.clone(),
            SessionEntry {
                hub,
                members: BTreeSet::new(),
                revision: 0,
                created: Instant::now(),
            },
        );
        tracing::info!(session = %session, "session created");
        Ok(session)
    }

    /// Bridges the channel at `locator` into `session` under `key`.
    ///
    /// Joining a key that is already a member succeeds without acquiring a
    /// transport. A transport acquired by an attempt that lost a race is kept
    /// for the next attempt and released if it turns out not to be needed.
    pub async fn connect_participant(
        &self,
        session: &SessionId,
        key: &ParticipantKey,
        locator: &str,
    ) -> BridgeResult<ConnectOutcome> {
        let attempts = self.settings.max_update_retries.max(1);
        let mut pending: Option<ParticipantEndpoint> = None;

        for attempt in 1..=attempts {
            let snapshot = match self.snapshot(session, key).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    release(pending.take());
                    return Err(e);
                }
            };
            if snapshot.is_member {
                release(pending.take());
                tracing::debug!(session = %session, key = %key, "already a member");
                return Ok(ConnectOutcome::AlreadyMember);
            }

            let endpoint = match pending.take() {
                Some(endpoint) => endpoint,
                None => {
                    let transport = self.acquirer.acquire(locator).await.map_err(|e| {
                        tracing::warn!(session = %session, key = %key, "transport unavailable: {e}");
                        BridgeError::TransportUnavailable {
                            locator: locator.to_owned(),
                            reason: e.to_string(),
                        }
                    })?;
                    ParticipantEndpoint::new(session.clone(), key.clone(), transport)
                }
            };

            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(session) else {
                endpoint.stop();
                return Err(not_found(session));
            };
            if entry.revision != snapshot.revision {
                drop(sessions);
                tracing::trace!(session = %session, key = %key, attempt, "membership changed, retrying connect");
                pending = Some(endpoint);
                tokio::task::yield_now().await;
                continue;
            }
            if let Err(e) = verify_hub(session, entry).await {
                endpoint.stop();
                return Err(e);
            }
            entry.hub.join(key.clone(), endpoint).await?;
            entry.members.insert(key.clone());
            entry.revision += 1;
            tracing::info!(session = %session, key = %key, members = entry.members.len(), "participant connected");
            return Ok(ConnectOutcome::Joined);
        }

        release(pending);
        tracing::warn!(session = %session, key = %key, attempts, "connect gave up under contention");
        Err(BridgeError::Busy {
            session: session.clone(),
            attempts,
        })
    }

    /// Removes `key` from `session`. Removing the last participant deletes
    /// the session and stops its hub in the same transition.
    pub async fn disconnect_participant(
        &self,
        session: &SessionId,
        key: &ParticipantKey,
    ) -> BridgeResult<DisconnectOutcome> {
        let attempts = self.settings.max_update_retries.max(1);

        for attempt in 1..=attempts {
            let snapshot = self.snapshot(session, key).await?;
            if !snapshot.is_member {
                return Err(BridgeError::NotMember {
                    session: session.clone(),
                    key: key.clone(),
                });
            }

            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(session) else {
                return Err(not_found(session));
            };
            if entry.revision != snapshot.revision {
                drop(sessions);
                tracing::trace!(session = %session, key = %key, attempt, "membership changed, retrying disconnect");
                tokio::task::yield_now().await;
                continue;
            }
            verify_hub(session, entry).await?;
            entry.hub.leave(key).await?;
            entry.members.remove(key);
            entry.revision += 1;
            let remaining = entry.members.len();
            tracing::info!(session = %session, key = %key, remaining, "participant disconnected");

            if remaining > 0 {
                return Ok(DisconnectOutcome::Left { remaining });
            }
            let closed = sessions.remove(session);
            drop(sessions);
            if let Some(closed) = closed {
                closed.hub.stop().await;
            }
            tracing::info!(session = %session, "last participant left, session closed");
            return Ok(DisconnectOutcome::SessionClosed);
        }

        tracing::warn!(session = %session, key = %key, attempts, "disconnect gave up under contention");
        Err(BridgeError::Busy {
            session: session.clone(),
            attempts,
        })
    }

    /// Removes `key` from every session it belongs to. Returns the sessions
    /// it actually left.
    pub async fn disconnect_everywhere(&self, key: &ParticipantKey) -> Vec<SessionId> {
        let candidates: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.members.contains(key))
            .map(|(session, _)| session.clone())
            .collect();

        let mut left = Vec::with_capacity(candidates.len());
        for session in candidates {
            // Cleanup retries contention without a bound.
            let outcome = loop {
                match self.disconnect_participant(&session, key).await {
                    Err(BridgeError::Busy { .. }) => {
                        tracing::debug!(session = %session, key = %key, "still contended, retrying cleanup");
                        tokio::task::yield_now().await;
                    }
                    outcome => break outcome,
                }
            };
            match outcome {
                Ok(_) => left.push(session),
                Err(BridgeError::NotMember { .. } | BridgeError::SessionNotFound { .. }) => {}
                Err(e) => tracing::warn!(session = %session, key = %key, "could not disconnect: {e}"),
            }
        }
        left
    }

    /// Removes sessions that have stayed empty for at least `max_age` since
    /// they were created. Returns how many were removed.
    pub async fn reap_empty_sessions(&self, max_age: Duration) -> usize {
        let reaped: Vec<(SessionId, SessionEntry)> = {
            let mut sessions = self.sessions.write().await;
            let idle: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, entry)| entry.members.is_empty() && entry.created.elapsed() >= max_age)
                .map(|(session, _)| session.clone())
                .collect();
            idle.into_iter()
                .filter_map(|session| sessions.remove_entry(&session))
                .collect()
        };
        for (session, entry) in &reaped {
            entry.hub.stop().await;
            tracing::info!(session = %session, "empty session reaped");
        }
        reaped.len()
    }

    /// Stops every hub and every participant. Used at shutdown.
    pub async fn teardown_all(&self) {
        let drained: Vec<(SessionId, SessionEntry)> =
            self.sessions.write().await.drain().collect();
        for (session, entry) in drained {
            entry.hub.stop().await;
            tracing::info!(session = %session, participants = entry.members.len(), "session torn down");
        }
    }

    /// The registry's view of a session's membership.
    pub async fn session_members(&self, session: &SessionId) -> BridgeResult<BTreeSet<ParticipantKey>> {
        self.sessions
            .read()
            .await
            .get(session)
            .map(|entry| entry.members.clone())
            .ok_or_else(|| not_found(session))
    }

    /// The hub's view of a session's membership.
    pub async fn live_members(&self, session: &SessionId) -> BridgeResult<BTreeSet<ParticipantKey>> {
        let hub = self
            .sessions
            .read()
            .await
            .get(session)
            .map(|entry| entry.hub.clone())
            .ok_or_else(|| not_found(session))?;
        hub.members().await
    }

    pub async fn contains_session(&self, session: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn snapshot(&self, session: &SessionId, key: &ParticipantKey) -> BridgeResult<Snapshot> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(session).ok_or_else(|| not_found(session))?;
        Ok(Snapshot {
            revision: entry.revision,
            is_member: entry.members.contains(key),
        })
    }
}

async fn verify_hub(session: &SessionId, entry: &SessionEntry) -> BridgeResult<()> {
    let live = entry.hub.members().await?;
    if live != entry.members {
        tracing::error!(
            session = %session,
            registry = ?entry.members,
            hub = ?live,
            "registry and hub membership diverged, refusing mutation"
        );
        return Err(BridgeError::InternalInvariantViolation {
            session: session.clone(),
        });
    }
    Ok(())
}

fn release(endpoint: Option<ParticipantEndpoint>) {
    if let Some(endpoint) = endpoint {
        endpoint.stop();
    }
}

fn not_found(session: &SessionId) -> BridgeError {
    BridgeError::SessionNotFound {
        session: session.clone(),
    }
}
