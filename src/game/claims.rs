//! Claim Evaluation
//!
//! Pure predicates deciding whether a player's marks satisfy a prize.
//! Nothing here touches session state.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::ticket::Ticket;
use crate::TICKET_ROWS;

/// A player's own marks.
pub type MarkSet = BTreeSet<u8>;

/// Prize kinds a player can claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimKind {
    /// Every number in the top row.
    FirstLine,
    /// Every number in the middle row.
    SecondLine,
    /// Every number in the bottom row.
    ThirdLine,
    /// Any five marks.
    EarlyFive,
    /// First and last numbers of the top and bottom rows.
    Corners,
    /// Every number on the ticket.
    FullHouse,
}

impl ClaimKind {
    /// All kinds, in display order.
    pub const ALL: [ClaimKind; 6] = [
        ClaimKind::FirstLine,
        ClaimKind::SecondLine,
        ClaimKind::ThirdLine,
        ClaimKind::EarlyFive,
        ClaimKind::Corners,
        ClaimKind::FullHouse,
    ];

    /// Points awarded for a verified claim of this kind.
    pub fn points(self) -> u32 {
        match self {
            ClaimKind::FirstLine | ClaimKind::SecondLine | ClaimKind::ThirdLine => 10,
            ClaimKind::EarlyFive | ClaimKind::Corners => 5,
            ClaimKind::FullHouse => 20,
        }
    }

    /// Human-readable name.
    pub fn display_name(self) -> &'static str {
        match self {
            ClaimKind::FirstLine => "First Line",
            ClaimKind::SecondLine => "Second Line",
            ClaimKind::ThirdLine => "Third Line",
            ClaimKind::EarlyFive => "Early 5",
            ClaimKind::Corners => "Corners",
            ClaimKind::FullHouse => "Full House",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Marks needed for an early-five claim.
pub const EARLY_FIVE_MARKS: usize = 5;

fn row_complete(ticket: &Ticket, row: usize, marks: &MarkSet) -> bool {
    ticket.row_numbers(row).iter().all(|n| marks.contains(n))
}

/// Top row fully marked.
pub fn first_line(ticket: &Ticket, marks: &MarkSet) -> bool {
    row_complete(ticket, 0, marks)
}

/// Middle row fully marked.
pub fn second_line(ticket: &Ticket, marks: &MarkSet) -> bool {
    row_complete(ticket, 1, marks)
}

/// Bottom row fully marked.
pub fn third_line(ticket: &Ticket, marks: &MarkSet) -> bool {
    row_complete(ticket, TICKET_ROWS - 1, marks)
}

/// At least five marks of any kind.
///
/// Counts marks, not ticket numbers: any five marked numbers qualify.
pub fn early_five(marks: &MarkSet) -> bool {
    marks.len() >= EARLY_FIVE_MARKS
}

/// The four corner numbers of a ticket: first and last filled cells of
/// the top row, then of the bottom row. Empty rows contribute nothing.
pub fn corner_numbers(ticket: &Ticket) -> Vec<u8> {
    let mut corners = Vec::with_capacity(4);
    for row in [0, TICKET_ROWS - 1] {
        let numbers = ticket.row_numbers(row);
        if let (Some(&first), Some(&last)) = (numbers.first(), numbers.last()) {
            corners.push(first);
            if last != first {
                corners.push(last);
            }
        }
    }
    corners
}

/// All four corners marked.
pub fn corners(ticket: &Ticket, marks: &MarkSet) -> bool {
    let corners = corner_numbers(ticket);
    !corners.is_empty() && corners.iter().all(|n| marks.contains(n))
}

/// Every ticket number marked.
pub fn full_house(ticket: &Ticket, marks: &MarkSet) -> bool {
    ticket.numbers().all(|n| marks.contains(&n))
}

/// Evaluate one claim kind.
pub fn evaluate(kind: ClaimKind, ticket: &Ticket, marks: &MarkSet) -> bool {
    match kind {
        ClaimKind::FirstLine => first_line(ticket, marks),
        ClaimKind::SecondLine => second_line(ticket, marks),
        ClaimKind::ThirdLine => third_line(ticket, marks),
        ClaimKind::EarlyFive => early_five(marks),
        ClaimKind::Corners => corners(ticket, marks),
        ClaimKind::FullHouse => full_house(ticket, marks),
    }
}

/// Every kind currently satisfied.
pub fn satisfied_kinds(ticket: &Ticket, marks: &MarkSet) -> Vec<ClaimKind> {
    ClaimKind::ALL.into_iter()
        .filter(|kind| evaluate(*kind, ticket, marks))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
