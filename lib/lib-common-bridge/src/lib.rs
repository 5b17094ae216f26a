mod control;
mod handshake;

pub mod types {
    pub use crate::control::{ControlRequest, ControlResponse, MAX_CONTROL_MESSAGE_LEN};
    pub use crate::handshake::{HANDSHAKE_ACK, HandshakeError, HelloRequest, MAX_HELLO_LEN};
}

#[cfg(test)]
mod tests {
    use crate::types::*;

    #[test]
    fn test_to_string_handshake_error() {
        let error = HandshakeError::InvalidHelloReceived;
        assert_eq!(error.to_string(), "InvalidHelloReceived");
    }

    #[test]
    fn test_handshake_error_serde_name() {
        let json = serde_json::to_string(&HandshakeError::ChannelInUse).unwrap();
        assert_eq!(json, "\"ChannelInUse\"");
    }

    #[test]
    fn test_blank_channel_is_invalid() {
        assert!(!HelloRequest::new("   ").is_valid());
        assert!(HelloRequest::new("guild-7").is_valid());
    }

    #[test]
    fn test_control_request_tagging() {
        let request: ControlRequest =
            serde_json::from_str(r#"{"command":"connect","session_id":"abc"}"#).unwrap();
        assert_eq!(
            request,
            ControlRequest::Connect {
                session_id: "abc".into()
            }
        );

        let start: ControlRequest = serde_json::from_str(r#"{"command":"start"}"#).unwrap();
        assert_eq!(start, ControlRequest::Start);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let parsed = serde_json::from_str::<ControlRequest>(r#"{"command":"shout"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_response_omits_missing_session() {
        let json = serde_json::to_value(ControlResponse::failed("nope")).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("session_id").is_none());

        let json = serde_json::to_value(ControlResponse::ok("made").with_session("s1")).unwrap();
        assert_eq!(json["session_id"], "s1");
    }
}
