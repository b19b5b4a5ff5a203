//! Scoring
//!
//! Turns the claims log into points once the game is over.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::game::claims::ClaimKind;
use crate::game::error::{GameError, GameResult};
use crate::game::state::{GameSession, PlayerScore};

/// One row of the final standings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    /// Player name.
    pub player: String,
    /// Points per prize kind.
    pub points: BTreeMap<ClaimKind, u32>,
    /// Total points.
    pub total: u32,
}

/// Score every listed player from verified claims only.
///
/// Pure: the same session always yields the same scores.
pub fn compute_scores(session: &GameSession) -> BTreeMap<String, PlayerScore> {
    let mut scores: BTreeMap<String, PlayerScore> = session.players.iter()
        .map(|p| (p.clone(), PlayerScore::default()))
        .collect();

    for claim in session.claims.iter().filter(|c| c.verified == Some(true)) {
        let score = scores.entry(claim.player.clone()).or_default();
        let points = claim.kind.points();
        *score.points.entry(claim.kind).or_insert(0) += points;
        score.total += points;
    }

    scores
}

/// Rank scores, highest total first. Ties keep join order.
pub fn leaderboard(session: &GameSession, scores: &BTreeMap<String, PlayerScore>) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<(&String, &PlayerScore)> = session.players.iter()
        .filter_map(|p| scores.get(p).map(|s| (p, s)))
        .collect();
    rows.sort_by(|a, b| b.1.total.cmp(&a.1.total));

    rows.into_iter()
        .enumerate()
        .map(|(i, (player, score))| LeaderboardEntry {
            rank: i + 1,
            player: player.clone(),
            points: score.points.clone(),
            total: score.total,
        })
        .collect()
}

/// End the game and record final scores. Host only, after every number
/// has been called.
pub fn end_game(session: &mut GameSession, by: &str, now: DateTime<Utc>) -> GameResult<Vec<LeaderboardEntry>> {
    session.require_host(by)?;
    if session.ended {
        return Err(GameError::AlreadyEnded);
    }
    if !session.started {
        return Err(GameError::NotStarted);
    }
    let remaining = session.numbers_remaining();
    if remaining > 0 {
        return Err(GameError::DrawsRemaining(remaining));
    }

    let scores = compute_scores(session);
    let board = leaderboard(session, &scores);

    session.scores = Some(scores);
    session.ended = true;
    session.ended_at = Some(now);

    info!(code = %session.code, players = board.len(), "Game ended");
    Ok(board)
}

// =============================================================================
// TESTS
// =============================================================================
