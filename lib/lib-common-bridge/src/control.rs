//! Control protocol spoken on every bidirectional stream after the hello.
//! One request per stream, answered by exactly one response.

use serde::{Deserialize, Serialize};

pub const MAX_CONTROL_MESSAGE_LEN: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    /// List the available commands.
    Help,
    /// Create a fresh session and return its id.
    Start,
    /// Bridge the caller's channel into an existing session.
    Connect { session_id: String },
    /// Remove the caller's channel from a session.
    Disconnect { session_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            session_id: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
