//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged by `type`.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::game::claims::ClaimKind;
use crate::game::error::GameError;
use crate::game::events::GameEvent;
use crate::game::state::{ClaimStatus, GameSession, RewardConfig};
use crate::game::ticket::Ticket;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Host a new game.
    CreateGame {
        /// Host's display name.
        name: String,
        /// Reward quotas; defaults to one of each.
        #[serde(default)]
        config: Option<RewardConfig>,
    },

    /// Join (or rejoin) a game by code.
    JoinGame {
        /// Game code.
        code: String,
        /// Display name.
        name: String,
    },

    /// Replace reward quotas before the start. Host only.
    Configure {
        /// New quotas.
        config: RewardConfig,
    },

    /// Start calling numbers. Host only.
    StartGame,

    /// Toggle a mark on the player's ticket.
    Mark {
        /// Number to toggle.
        number: u8,
    },

    /// Claim a prize.
    SubmitClaim {
        /// Prize claimed.
        kind: ClaimKind,
    },

    /// Accept a pending claim. Host only.
    VerifyClaim {
        /// Position in the claims log.
        index: usize,
    },

    /// Turn a pending claim down. Host only.
    RejectClaim {
        /// Position in the claims log.
        index: usize,
    },

    /// Pause number calling. Host only.
    PauseDraws,

    /// Resume number calling. Host only.
    ResumeDraws,

    /// End the game once every number is out. Host only.
    EndGame,

    /// Request current game state (for reconnection).
    SyncRequest,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Player is leaving the game.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Client is now part of a game.
    Joined(JoinedInfo),

    /// Full game document.
    Snapshot {
        /// Current document.
        session: GameSession,
    },

    /// Something happened in the game.
    Event(GameEvent),

    /// The player's marks after a change.
    Marks {
        /// Marked numbers.
        marked: BTreeSet<u8>,
        /// Prizes the marks currently satisfy.
        claimable: Vec<ClaimKind>,
    },

    /// Outcome of the client's own claim action.
    ClaimStatus {
        /// Position in the claims log.
        index: usize,
        /// Prize.
        kind: ClaimKind,
        /// Where the claim stands.
        status: ClaimStatus,
    },

    /// Pong response.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server time in milliseconds since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Sent after a successful create or join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Game code.
    pub code: String,
    /// Player's name as recorded.
    pub player: String,
    /// Whether the player hosts this game.
    pub is_host: bool,
    /// The player's ticket.
    pub ticket: Ticket,
    /// The player's marks.
    pub marked: BTreeSet<u8>,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed message.
    InvalidInput,
    /// Message needs a joined game.
    NotInGame,
    /// No such game.
    GameNotFound,
    /// Game already started.
    AlreadyStarted,
    /// Game not started.
    NotStarted,
    /// Game already ended.
    AlreadyEnded,
    /// Host-only action.
    NotHost,
    /// Not a player in this game.
    NotMember,
    /// Blank player name.
    InvalidName,
    /// Ticket does not satisfy the claim.
    InvalidClaim,
    /// Prize already claimed by this player.
    AlreadyClaimed,
    /// No rewards left for the prize.
    QuotaExhausted,
    /// Unknown claim.
    ClaimNotFound,
    /// Claim already decided.
    ClaimNotPending,
    /// Number not called yet.
    NumberNotDrawn,
    /// Number not on the ticket.
    NotOnTicket,
    /// Numbers still to be called.
    DrawsRemaining,
    /// Concurrent update won; retry.
    Conflict,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&GameError> for ErrorCode {
    fn from(error: &GameError) -> Self {
        match error {
            GameError::NotFound(_) => ErrorCode::GameNotFound,
            GameError::AlreadyStarted => ErrorCode::AlreadyStarted,
            GameError::NotStarted => ErrorCode::NotStarted,
            GameError::AlreadyEnded => ErrorCode::AlreadyEnded,
            GameError::NotHost => ErrorCode::NotHost,
            GameError::NotMember(_) => ErrorCode::NotMember,
            GameError::InvalidName => ErrorCode::InvalidName,
            GameError::InvalidClaim(_) => ErrorCode::InvalidClaim,
            GameError::AlreadyClaimed(_) => ErrorCode::AlreadyClaimed,
            GameError::QuotaExhausted(_) => ErrorCode::QuotaExhausted,
            GameError::ClaimNotFound(_) => ErrorCode::ClaimNotFound,
            GameError::ClaimNotPending(_) => ErrorCode::ClaimNotPending,
            GameError::NumberNotDrawn(_) => ErrorCode::NumberNotDrawn,
            GameError::NotOnTicket(_) => ErrorCode::NotOnTicket,
            GameError::DrawsRemaining(_) => ErrorCode::DrawsRemaining,
            GameError::DrawConflict { .. } | GameError::VersionConflict { .. } => ErrorCode::Conflict,
            GameError::CodeTaken(_) | GameError::StoreUnavailable | GameError::Ticket(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<GameError> for ServerError {
    fn from(error: GameError) -> Self {
        Self::new(ErrorCode::from(&error), error.to_string())
    }
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
    use chrono::Utc;
    use crate::game::events::GameEventData;

    #[test]
    fn test_client_message_json() {
        let msg = ClientMessage::from_json(r#"{"type":"submit_claim","kind":"fullHouse"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SubmitClaim { kind: ClaimKind::FullHouse }));

        let msg = ClientMessage::from_json(r#"{"type":"create_game","name":"Asha"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CreateGame { config: None, .. }));

        let msg = ClientMessage::from_json(
            r#"{"type":"configure","config":{"firstLine":2,"fullHouse":1}}"#,
        ).unwrap();
        if let ClientMessage::Configure { config } = msg {
            assert_eq!(config.quota(ClaimKind::FirstLine), 2);
            assert_eq!(config.quota(ClaimKind::Corners), 0);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_unit_messages() {
        for (json, expected) in [
            (r#"{"type":"start_game"}"#, "StartGame"),
            (r#"{"type":"pause_draws"}"#, "PauseDraws"),
            (r#"{"type":"end_game"}"#, "EndGame"),
            (r#"{"type":"sync_request"}"#, "SyncRequest"),
        ] {
            let msg = ClientMessage::from_json(json).unwrap();
            assert_eq!(format!("{msg:?}"), expected);
        }
        assert!(ClientMessage::from_json(r#"{"type":"mark"}"#).is_err());
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::Event(GameEvent::new("ABC123", Utc::now(), GameEventData::ClaimVerified {
            index: 2,
            player: "alice".into(),
            kind: ClaimKind::Corners,
        }));

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""event":"claim_verified""#));

        let parsed = ServerMessage::from_json(&json).unwrap();
        if let ServerMessage::Event(event) = parsed {
            assert_eq!(event.player(), Some("alice"));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_game_error_mapping() {
        let error = ServerError::from(GameError::QuotaExhausted(ClaimKind::FullHouse));
        assert_eq!(error.code, ErrorCode::QuotaExhausted);
        assert_eq!(error.message, "no rewards left for Full House");

        let msg = ServerMessage::Error(error);
        let json = msg.to_json().unwrap();
        assert!(json.contains("quota_exhausted"));

        assert_eq!(
            ErrorCode::from(&GameError::VersionConflict { expected: 1, actual: 2 }),
            ErrorCode::Conflict,
        );
    }
}
