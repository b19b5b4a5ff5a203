//! Player Cards
//!
//! A card is a player's private ticket plus the numbers they have marked.
//! Cards never appear in the shared session document.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::claims::{self, ClaimKind, MarkSet};
use crate::game::error::{GameError, GameResult};
use crate::game::ticket::{generate_ticket, Ticket};

/// A player's ticket and marks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCard {
    /// Owner's display name.
    pub player: String,
    /// The ticket.
    pub ticket: Ticket,
    /// Numbers the player has marked.
    pub marked: MarkSet,
}

impl PlayerCard {
    /// Issue a fresh card.
    pub fn issue(player: impl Into<String>, rng: &mut DeterministicRng) -> GameResult<Self> {
        Ok(Self::with_ticket(player, generate_ticket(rng)?))
    }

    /// Card with a given ticket and no marks.
    pub fn with_ticket(player: impl Into<String>, ticket: Ticket) -> Self {
        Self {
            player: player.into(),
            ticket,
            marked: MarkSet::new(),
        }
    }

    /// Toggle a mark.
    ///
    /// Only called numbers on the ticket can be marked. Returns whether the
    /// number is marked afterwards.
    pub fn toggle_mark(&mut self, number: u8, drawn: &BTreeSet<u8>) -> GameResult<bool> {
        if !self.ticket.contains(number) {
            return Err(GameError::NotOnTicket(number));
        }
        if !drawn.contains(&number) {
            return Err(GameError::NumberNotDrawn(number));
        }

        if self.marked.remove(&number) {
            Ok(false)
        } else {
            self.marked.insert(number);
            Ok(true)
        }
    }

    /// Whether the card currently satisfies `kind`.
    pub fn satisfies(&self, kind: ClaimKind) -> bool {
        claims::evaluate(kind, &self.ticket, &self.marked)
    }

    /// Every kind the card currently satisfies.
    pub fn satisfied_kinds(&self) -> Vec<ClaimKind> {
        claims::satisfied_kinds(&self.ticket, &self.marked)
    }
}
