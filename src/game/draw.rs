//! Number Drawing
//!
//! Picks the next number to call and works out when the next call is due.
//! The timed loop that drives this lives in `network::sequencer`.

use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::error::{GameError, GameResult};
use crate::game::state::GameSession;
use crate::{DEFAULT_DRAW_INTERVAL_MS, MAX_NUMBER, MIN_DRAW_DELAY_MS};

/// Result of a draw attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawOutcome {
    /// A new number was called.
    Drawn(u8),
    /// Every number has been called; nothing changed.
    Exhausted,
}

/// Timing between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCadence {
    /// Time between two calls.
    pub interval: Duration,
    /// Shortest wait when resuming late.
    pub min_delay: Duration,
}

impl Default for DrawCadence {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_DRAW_INTERVAL_MS),
            min_delay: Duration::from_millis(MIN_DRAW_DELAY_MS),
        }
    }
}

impl DrawCadence {
    /// Wait before the next call, given the last one.
    ///
    /// Resuming mid-interval waits out the remainder instead of restarting
    /// it, but never less than `min_delay`. Without a previous call the full
    /// interval applies.
    pub fn next_delay(&self, last_draw_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(last) = last_draw_at else {
            return self.interval;
        };

        // A clock that went backwards counts as no time elapsed.
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.interval.saturating_sub(elapsed).max(self.min_delay)
    }
}

/// Numbers not yet called, ascending.
pub fn undrawn_numbers(session: &GameSession) -> Vec<u8> {
    (1..=MAX_NUMBER)
        .filter(|n| !session.drawn_numbers.contains(n))
        .collect()
}

/// Call the next number.
///
/// Picks uniformly among uncalled numbers and records it as the current
/// number. When all numbers are out this is a no-op returning
/// [`DrawOutcome::Exhausted`].
pub fn draw_next(
    session: &mut GameSession,
    rng: &mut DeterministicRng,
    now: DateTime<Utc>,
) -> GameResult<DrawOutcome> {
    session.require_in_play()?;

    let remaining = undrawn_numbers(session);
    let Some(&number) = rng.choose(&remaining) else {
        return Ok(DrawOutcome::Exhausted);
    };

    session.drawn_numbers.insert(number);
    session.current_number = Some(number);
    session.last_draw_at = Some(now);

    Ok(DrawOutcome::Drawn(number))
}

/// [`draw_next`], guarded by the number of calls the caller last saw.
///
/// A caller working from a stale view gets [`GameError::DrawConflict`]
/// instead of calling a second number for the same slot.
pub fn draw_next_if(
    session: &mut GameSession,
    expected_drawn: usize,
    rng: &mut DeterministicRng,
    now: DateTime<Utc>,
) -> GameResult<DrawOutcome> {
    let actual = session.drawn_numbers.len();
    if actual != expected_drawn {
        return Err(GameError::DrawConflict { expected: expected_drawn, actual });
    }
    draw_next(session, rng, now)
}

// =============================================================================
// TESTS
// =============================================================================
