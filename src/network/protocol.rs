//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Messages
//! are JSON with an internal `type` tag.
//!
//! Inbound events never carry an identity: the identity bound to the
//! connection at authentication is the only one the server acts on.

use serde::{Deserialize, Serialize};

use crate::game::room::{PlayerId, RoomSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection. Must precede join/move.
    Auth(AuthRequest),

    /// Attach to a room by code.
    Join(JoinRequest),

    /// Play a cell in a room.
    Move(MoveRequest),

    /// Leave the current room without closing the connection.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back in the pong.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Identity token from the external credential provider.
    pub token: String,
    /// Client version, for log correlation only.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Room code to attach to.
    pub code: String,
}

/// Move request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Room code the move targets.
    pub code: String,
    /// Cell index, 0-8 row-major. Out-of-range values are denied by the
    /// validator, not the parser.
    pub cell: usize,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Full room snapshot; broadcast to every subscriber after each
    /// mutating transition.
    State(RoomSnapshot),

    /// Join refused; sent only to the requester.
    JoinError {
        /// Why the join was refused.
        reason: String,
    },

    /// Move denied; sent only to the requester, never broadcast.
    MoveRejected {
        /// Why the move was denied.
        reason: String,
    },

    /// Request-level error; sent only to the requester.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall-clock millis.
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Operator-facing reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether the token was accepted.
    pub success: bool,
    /// The identity now bound to the connection, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Request-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Token validation failed.
    AuthFailed,
    /// Join/move before authentication.
    NotAuthenticated,
    /// Unparseable or malformed message.
    InvalidMessage,
    /// No live room under the referenced code.
    RoomNotFound,
    /// The room store refused the operation; safe to resend later.
    StoreUnavailable,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::{Room, RoomStatus, Seat};

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::Move(MoveRequest {
            code: "ABC123".into(),
            cell: 4,
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"move\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        let ClientMessage::Move(request) = parsed else {
            panic!("wrong message type");
        };
        assert_eq!(request.code, "ABC123");
        assert_eq!(request.cell, 4);
    }

    #[test]
    fn test_auth_request_without_version() {
        let msg: ClientMessage =
            ClientMessage::from_json(r#"{"type":"auth","token":"abc.def.ghi"}"#).unwrap();
        let ClientMessage::Auth(auth) = msg else {
            panic!("wrong message type");
        };
        assert_eq!(auth.token, "abc.def.ghi");
        assert_eq!(auth.client_version, None);
    }

    #[test]
    fn test_join_and_move_carry_no_identity() {
        // Identity in the payload is the historical spoofing hole; the
        // parser must not accept one silently doing anything.
        let json = r#"{"type":"join","code":"ABC123"}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        assert!(matches!(parsed, ClientMessage::Join(_)));

        let tagged = ClientMessage::Join(JoinRequest { code: "X".into() })
            .to_json()
            .unwrap();
        assert!(!tagged.contains("player"));
        assert!(!tagged.contains("identity"));
    }

    #[test]
    fn test_state_snapshot_shape() {
        let mut room = Room::new("ABC123".into(), PlayerId::new([1; 16]));
        room.admit_guest(PlayerId::new([2; 16]));
        let snapshot = room.snapshot(|_| None);

        let json = ServerMessage::State(snapshot).to_json().unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(json.contains("\"status\":\"playing\""));
        assert!(json.contains("\"turn\":\"host\""));
        // Unset result/winner stay off the wire.
        assert!(!json.contains("\"result\""));
        assert!(!json.contains("\"winner\""));

        let parsed = ServerMessage::from_json(&json).unwrap();
        let ServerMessage::State(back) = parsed else {
            panic!("wrong message type");
        };
        assert_eq!(back.status, RoomStatus::Playing);
        assert_eq!(back.turn, Seat::Host);
    }

    #[test]
    fn test_error_codes_snake_case() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::RoomNotFound,
            message: "no such room".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("room_not_found"));
    }

    #[test]
    fn test_rejection_messages() {
        let join = ServerMessage::JoinError {
            reason: "room is full".into(),
        };
        assert!(join.to_json().unwrap().contains("\"type\":\"join_error\""));

        let rejected = ServerMessage::MoveRejected {
            reason: "not your turn".into(),
        };
        assert!(rejected
            .to_json()
            .unwrap()
            .contains("\"type\":\"move_rejected\""));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"warp"}"#).is_err());
        // Negative cell indices fail at the parser.
        assert!(
            ClientMessage::from_json(r#"{"type":"move","code":"A","cell":-1}"#).is_err()
        );
    }
}
