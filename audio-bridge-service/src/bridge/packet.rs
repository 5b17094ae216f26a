use bytes::Bytes;
use derive_more::Display;

/// Opaque token naming a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies one participant (the external channel it bridges) within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct ParticipantKey(String);

impl ParticipantKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParticipantKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A frame published into a session. Never modified after construction; the
/// hub shares one allocation between every subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub origin: ParticipantKey,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(origin: ParticipantKey, payload: impl Into<Bytes>) -> Self {
        Self {
            origin,
            payload: payload.into(),
        }
    }
}
