//! Claim Arbitration
//!
//! Moves claims through `Pending -> Verified | Rejected`. Quota is always
//! recomputed from the claims log, so callers must run these inside one
//! store transaction for the check and the write to be atomic.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::game::card::PlayerCard;
use crate::game::claims::ClaimKind;
use crate::game::error::{GameError, GameResult};
use crate::game::state::{Claim, ClaimStatus, GameSession};

/// Outcome of a submitted claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    /// Position in the claims log.
    pub index: usize,
    /// Status right after submission.
    pub status: ClaimStatus,
}

/// Submit a claim for the card's owner.
///
/// Checks run in order: game in play, membership, the ticket satisfies the
/// kind, no earlier submission of the kind, quota left. The host's own
/// claims are verified on the spot.
pub fn submit_claim(
    session: &mut GameSession,
    card: &PlayerCard,
    kind: ClaimKind,
    now: DateTime<Utc>,
) -> GameResult<ClaimReceipt> {
    session.require_in_play()?;

    let player = card.player.as_str();
    if !session.is_member(player) {
        return Err(GameError::NotMember(player.to_string()));
    }
    if !card.satisfies(kind) {
        return Err(GameError::InvalidClaim(kind));
    }
    if session.has_claimed(player, kind) {
        return Err(GameError::AlreadyClaimed(kind));
    }
    if session.quota_remaining(kind) == 0 {
        return Err(GameError::QuotaExhausted(kind));
    }

    let mut claim = Claim::new(kind, player, now);
    if session.is_host(player) {
        claim.verified = Some(true);
    }
    let status = claim.status();

    session.claims.push(claim);
    let index = session.claims.len() - 1;
    debug!(code = %session.code, player, %kind, index, ?status, "Claim submitted");

    Ok(ClaimReceipt { index, status })
}

fn pending_claim<'a>(session: &'a mut GameSession, by: &str, index: usize) -> GameResult<&'a mut Claim> {
    session.require_host(by)?;
    let claim = session.claims.get_mut(index).ok_or(GameError::ClaimNotFound(index))?;
    if !claim.is_pending() {
        return Err(GameError::ClaimNotPending(index));
    }
    Ok(claim)
}

/// Accept a pending claim. Host only; quota is checked again.
pub fn verify_claim<'a>(session: &'a mut GameSession, by: &str, index: usize) -> GameResult<&'a Claim> {
    let kind = pending_claim(session, by, index)?.kind;
    if session.quota_remaining(kind) == 0 {
        return Err(GameError::QuotaExhausted(kind));
    }

    let claim = &mut session.claims[index];
    claim.verified = Some(true);
    Ok(claim)
}

/// Turn down a pending claim. Host only; rejection is final.
pub fn reject_claim<'a>(session: &'a mut GameSession, by: &str, index: usize) -> GameResult<&'a Claim> {
    let claim = pending_claim(session, by, index)?;
    claim.verified = Some(false);
    Ok(claim)
}

// =============================================================================
// TESTS
// =============================================================================
