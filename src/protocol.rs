//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::ActivityKind;
use crate::error::TutorError;
use crate::session::SessionView;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Unlock {
        pin: String,
    },
    StartActivity {
        kind: ActivityKind,
    },
    SubmitWork {
        text: String,
    },
    View,
}

impl ClientWsMessage {
    /// Message type for logs; payloads (PINs, student text) are never logged.
    pub fn label(&self) -> &'static str {
        match self {
            ClientWsMessage::Ping => "ping",
            ClientWsMessage::Unlock { .. } => "unlock",
            ClientWsMessage::StartActivity { .. } => "start_activity",
            ClientWsMessage::SubmitWork { .. } => "submit_work",
            ClientWsMessage::View => "view",
        }
    }
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    View {
        view: SessionView,
    },
    /// Rejected input (blank submission, nothing started yet).
    Warning {
        kind: String,
        message: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl From<&TutorError> for ServerWsMessage {
    fn from(e: &TutorError) -> Self {
        let kind = e.kind().to_string();
        let message = e.to_string();
        if e.is_warning() {
            ServerWsMessage::Warning { kind, message }
        } else {
            ServerWsMessage::Error { kind, message }
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionOut {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub view: SessionView,
}

#[derive(Debug, Serialize)]
pub struct ViewOut {
    pub view: SessionView,
}

#[derive(Deserialize)]
pub struct UnlockIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub pin: String,
}

#[derive(Deserialize)]
pub struct StartIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub kind: ActivityKind,
}

#[derive(Deserialize)]
pub struct SubmitIn {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub error: String,
    pub message: String,
    pub warning: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_type_tagged() {
        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"start_activity","kind":"puzzle"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::StartActivity { kind: ActivityKind::Puzzle }));

        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"submit_work","text":"hi"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::SubmitWork { ref text } if text == "hi"));
    }

    #[test]
    fn warnings_and_errors_serialize_differently() {
        let w = serde_json::to_value(ServerWsMessage::from(&TutorError::EmptySubmission)).unwrap();
        assert_eq!(w["type"], "warning");
        assert_eq!(w["kind"], "empty_submission");

        let e = serde_json::to_value(ServerWsMessage::from(&TutorError::service("down"))).unwrap();
        assert_eq!(e["type"], "error");
        assert_eq!(e["kind"], "service_error");
    }
}
