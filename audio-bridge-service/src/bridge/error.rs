use derive_more::{Display, Error};

use super::packet::{ParticipantKey, SessionId};

/// Errors returned by the hub and the session registry. None of them is fatal
/// for the process; callers turn them into acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BridgeError {
    #[display("session {session} not found")]
    SessionNotFound { session: SessionId },

    #[display("{key} is not a member of session {session}")]
    NotMember {
        session: SessionId,
        key: ParticipantKey,
    },

    #[display("generated session id {session} already exists")]
    DuplicateId { session: SessionId },

    #[display("transport unavailable for {locator}: {reason}")]
    TransportUnavailable { locator: String, reason: String },

    /// Registry membership and hub membership disagree. Unreachable unless
    /// there is a bug; the mutation that detected it is refused.
    #[display("membership of session {session} diverged from its hub")]
    InternalInvariantViolation { session: SessionId },

    #[display("session {session} stayed contended for {attempts} attempts")]
    Busy { session: SessionId, attempts: usize },

    #[display("hub of session {session} is closed")]
    HubClosed { session: SessionId },
}

pub type BridgeResult<T> = Result<T, BridgeError>;
