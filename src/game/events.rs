//! Game Events
//!
//! Notifications fanned out to every client of a session. The session
//! document stays the source of truth; events only say what just changed.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::claims::ClaimKind;
use crate::game::scoring::LeaderboardEntry;
use crate::game::state::RewardConfig;

/// Event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEventData {
    /// A new player joined.
    PlayerJoined {
        /// Player name.
        player: String,
    },

    /// Host changed reward quotas.
    ConfigUpdated {
        /// New quotas.
        config: RewardConfig,
    },

    /// Number calling began.
    GameStarted {
        /// Milliseconds until the first call.
        next_draw_in_ms: u64,
    },

    /// A number was called.
    NumberDrawn {
        /// The number.
        number: u8,
        /// Numbers left to call.
        remaining: usize,
        /// Milliseconds until the next call, if any.
        next_draw_in_ms: Option<u64>,
    },

    /// Host paused number calling.
    DrawsPaused,

    /// Host resumed number calling.
    DrawsResumed {
        /// Milliseconds until the next call.
        next_draw_in_ms: u64,
    },

    /// Every number has been called.
    DrawsExhausted,

    /// A claim entered the log.
    ClaimSubmitted {
        /// Position in the claims log.
        index: usize,
        /// Claiming player.
        player: String,
        /// Prize claimed.
        kind: ClaimKind,
        /// Set when the claim was accepted on the spot.
        verified: bool,
    },

    /// Host accepted a claim.
    ClaimVerified {
        /// Position in the claims log.
        index: usize,
        /// Claiming player.
        player: String,
        /// Prize claimed.
        kind: ClaimKind,
    },

    /// Host turned a claim down.
    ClaimRejected {
        /// Position in the claims log.
        index: usize,
        /// Claiming player.
        player: String,
        /// Prize claimed.
        kind: ClaimKind,
    },

    /// Host ended the game.
    GameEnded {
        /// Final standings.
        leaderboard: Vec<LeaderboardEntry>,
    },
}

/// A game event with its timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// When the event happened.
    pub at: DateTime<Utc>,

    /// Game code.
    pub code: String,

    /// Event data
    #[serde(flatten)]
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event stamped `at`.
    pub fn new(code: impl Into<String>, at: DateTime<Utc>, data: GameEventData) -> Self {
        Self {
            at,
            code: code.into(),
            data,
        }
    }

    /// Player the event is about, if any.
    pub fn player(&self) -> Option<&str> {
        match &self.data {
            GameEventData::PlayerJoined { player }
            | GameEventData::ClaimSubmitted { player, .. }
            | GameEventData::ClaimVerified { player, .. }
            | GameEventData::ClaimRejected { player, .. } => Some(player),
            _ => None,
        }
    }
}
