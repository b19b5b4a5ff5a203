//! Game Logic Module
//!
//! Pure game rules. Nothing here does I/O or holds locks; the network layer
//! runs these inside session store transactions.
//!
//! ## Module Structure
//!
//! - `ticket`: Ticket layout and generation
//! - `claims`: Claim predicates over a ticket and its marks
//! - `card`: A player's ticket plus marks
//! - `state`: The shared session document
//! - `draw`: Number calling and cadence
//! - `arbitration`: Claim submission, verification, rejection
//! - `scoring`: Final scores and leaderboard
//! - `events`: Notifications for clients
//! - `error`: Rule violations

pub mod ticket;
pub mod claims;
pub mod card;
pub mod state;
pub mod draw;
pub mod arbitration;
pub mod scoring;
pub mod events;
pub mod error;

// Re-export key types
pub use ticket::{Ticket, TicketError, generate_ticket};
pub use claims::{ClaimKind, MarkSet};
pub use card::PlayerCard;
pub use state::{GameSession, RewardConfig, Claim, ClaimStatus, PlayerScore, Mutation, SessionFields};
pub use draw::{DrawOutcome, DrawCadence};
pub use arbitration::ClaimReceipt;
pub use scoring::LeaderboardEntry;
pub use events::{GameEvent, GameEventData};
pub use error::{GameError, GameResult};
