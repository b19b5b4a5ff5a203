//! Game Session State
//!
//! The shared document for one game. Every client observes the whole
//! document; only the server mutates it. BTreeMap/BTreeSet keep the
//! serialized form stable.

use std::collections::{BTreeMap, BTreeSet};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::claims::ClaimKind;
use crate::game::error::{GameError, GameResult};
use crate::MAX_NUMBER;

// =============================================================================
// REWARD CONFIG
// =============================================================================

/// How many players may be rewarded for each prize kind.
///
/// A kind missing from the map has no rewards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RewardConfig(BTreeMap<ClaimKind, u32>);

impl Default for RewardConfig {
    fn default() -> Self {
        Self(ClaimKind::ALL.into_iter().map(|kind| (kind, 1)).collect())
    }
}

impl RewardConfig {
    /// Config with no rewards for any kind.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style quota setter.
    pub fn with(mut self, kind: ClaimKind, quota: u32) -> Self {
        self.0.insert(kind, quota);
        self
    }

    /// Quota for a kind.
    pub fn quota(&self, kind: ClaimKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(0)
    }
}

// =============================================================================
// CLAIMS
// =============================================================================

/// One entry in the claims log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Prize claimed.
    pub kind: ClaimKind,
    /// Claiming player.
    pub player: String,
    /// When the claim was submitted.
    pub submitted_at: DateTime<Utc>,
    /// `None` while pending, then accepted or rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// Where a claim stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Awaiting the host.
    Pending,
    /// Accepted by the host.
    Verified,
    /// Turned down by the host.
    Rejected,
}

impl Claim {
    /// Create a pending claim.
    pub fn new(kind: ClaimKind, player: impl Into<String>, submitted_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            player: player.into(),
            submitted_at,
            verified: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> ClaimStatus {
        match self.verified {
            None => ClaimStatus::Pending,
            Some(true) => ClaimStatus::Verified,
            Some(false) => ClaimStatus::Rejected,
        }
    }

    /// Whether the claim is awaiting the host.
    pub fn is_pending(&self) -> bool {
        self.verified.is_none()
    }
}

// =============================================================================
// SCORES
// =============================================================================

/// Final points for one player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    /// Points per verified prize kind.
    pub points: BTreeMap<ClaimKind, u32>,
    /// Sum of all points.
    pub total: u32,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// The shared document for one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Shareable game code.
    pub code: String,
    /// Host's name; fixed at creation.
    pub host: String,
    /// Players in join order; the host is first.
    pub players: Vec<String>,
    /// Whether number calling has begun.
    pub started: bool,
    /// Every number called so far.
    pub drawn_numbers: BTreeSet<u8>,
    /// Most recently called number.
    pub current_number: Option<u8>,
    /// When the most recent number was called.
    pub last_draw_at: Option<DateTime<Utc>>,
    /// Reward quotas.
    pub config: RewardConfig,
    /// Claims log; entries are amended, never removed.
    pub claims: Vec<Claim>,
    /// Whether the host has ended the game.
    pub ended: bool,
    /// When the game ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Final scores, set when the game ends.
    pub scores: Option<BTreeMap<String, PlayerScore>>,
    /// Bumped on every successful mutation.
    pub version: u64,
    /// When the game was created.
    pub created_at: DateTime<Utc>,
}

impl GameSession {
    /// Create a game hosted by `host`.
    pub fn new(
        code: impl Into<String>,
        host: impl Into<String>,
        config: RewardConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let host = host.into();
        Self {
            code: code.into(),
            players: vec![host.clone()],
            host,
            started: false,
            drawn_numbers: BTreeSet::new(),
            current_number: None,
            last_draw_at: None,
            config,
            claims: Vec::new(),
            ended: false,
            ended_at: None,
            scores: None,
            version: 0,
            created_at: now,
        }
    }

    /// Whether `player` is the host.
    pub fn is_host(&self, player: &str) -> bool {
        self.host == player
    }

    /// Whether `player` has joined.
    pub fn is_member(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }

    /// Fail unless `player` is the host.
    pub fn require_host(&self, player: &str) -> GameResult<()> {
        if self.is_host(player) {
            Ok(())
        } else {
            Err(GameError::NotHost)
        }
    }

    /// Fail unless the game is running.
    pub fn require_in_play(&self) -> GameResult<()> {
        if !self.started {
            return Err(GameError::NotStarted);
        }
        if self.ended {
            return Err(GameError::AlreadyEnded);
        }
        Ok(())
    }

    /// Add a player.
    ///
    /// Joining twice with the same name is a rejoin and leaves the list
    /// unchanged. Once started, only existing players may rejoin.
    /// Returns whether the player was newly added.
    pub fn add_player(&mut self, player: &str) -> GameResult<bool> {
        let player = player.trim();
        if player.is_empty() {
            return Err(GameError::InvalidName);
        }
        if self.is_member(player) {
            return Ok(false);
        }
        if self.started {
            return Err(GameError::AlreadyStarted);
        }
        self.players.push(player.to_string());
        Ok(true)
    }

    /// Replace the reward config. Host only, before the start.
    pub fn configure(&mut self, by: &str, config: RewardConfig) -> GameResult<()> {
        self.require_host(by)?;
        if self.started {
            return Err(GameError::AlreadyStarted);
        }
        self.config = config;
        Ok(())
    }

    /// Start number calling. Host only, exactly once.
    pub fn start(&mut self, by: &str) -> GameResult<()> {
        self.require_host(by)?;
        if self.started {
            return Err(GameError::AlreadyStarted);
        }
        self.started = true;
        Ok(())
    }

    /// Numbers still to be called.
    pub fn numbers_remaining(&self) -> usize {
        MAX_NUMBER as usize - self.drawn_numbers.len()
    }

    /// Whether every number has been called.
    pub fn is_exhausted(&self) -> bool {
        self.numbers_remaining() == 0
    }

    /// Whether `number` has been called.
    pub fn is_drawn(&self, number: u8) -> bool {
        self.drawn_numbers.contains(&number)
    }

    /// Verified claims for a kind.
    pub fn count_verified(&self, kind: ClaimKind) -> u32 {
        self.claims.iter()
            .filter(|c| c.kind == kind && c.verified == Some(true))
            .count() as u32
    }

    /// Rewards still available for a kind, recomputed from the log.
    pub fn quota_remaining(&self, kind: ClaimKind) -> u32 {
        self.config.quota(kind).saturating_sub(self.count_verified(kind))
    }

    /// Whether `player` has already submitted `kind`.
    pub fn has_claimed(&self, player: &str, kind: ClaimKind) -> bool {
        self.claims.iter().any(|c| c.kind == kind && c.player == player)
    }

    /// Latest time the game showed any progress: creation, a call, a claim
    /// or the end.
    pub fn last_activity(&self) -> DateTime<Utc> {
        let claimed = self.claims.iter().map(|c| c.submitted_at).max();
        [Some(self.created_at), self.last_draw_at, claimed, self.ended_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }

    /// Apply a raw store mutation. Game rules are not checked here.
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Replace(fields) => {
                if let Some(started) = fields.started {
                    self.started = started;
                }
                if let Some(config) = fields.config {
                    self.config = config;
                }
                if let Some(claims) = fields.claims {
                    self.claims = claims;
                }
                if let Some(ended) = fields.ended {
                    self.ended = ended;
                }
                if let Some(scores) = fields.scores {
                    self.scores = Some(scores);
                }
            }
            Mutation::AppendPlayer(player) => {
                if !self.is_member(&player) {
                    self.players.push(player);
                }
            }
            Mutation::AppendClaim(claim) => {
                if !self.claims.contains(&claim) {
                    self.claims.push(claim);
                }
            }
        }
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Fields that may be replaced wholesale. `None` leaves a field as is.
///
/// Called numbers are absent: they only grow through a draw.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionFields {
    /// New started flag.
    pub started: Option<bool>,
    /// New reward config.
    pub config: Option<RewardConfig>,
    /// New claims log.
    pub claims: Option<Vec<Claim>>,
    /// New ended flag.
    pub ended: Option<bool>,
    /// New scores.
    pub scores: Option<BTreeMap<String, PlayerScore>>,
}

/// A raw document mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Whole-field replacement.
    Replace(SessionFields),
    /// Append a player unless already present.
    AppendPlayer(String),
    /// Append a claim unless an identical one is present.
    AppendClaim(Claim),
}

// =============================================================================
// TESTS
// =============================================================================
