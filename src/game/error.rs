//! Game errors.
//!
//! Every rule violation surfaces as one of these and is reported to the
//! player who triggered it. None of them is fatal; a failed operation
//! leaves the session untouched.

use thiserror::Error;

use crate::game::claims::ClaimKind;
use crate::game::ticket::TicketError;

/// Errors raised by game operations and the session store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// No session matches the code.
    #[error("game {0} not found")]
    NotFound(String),

    /// A session with this code already exists.
    #[error("game code {0} is already in use")]
    CodeTaken(String),

    /// The game has already started.
    #[error("game has already started")]
    AlreadyStarted,

    /// The game has not started yet.
    #[error("game has not started")]
    NotStarted,

    /// The game is over.
    #[error("game has already ended")]
    AlreadyEnded,

    /// Only the host may do this.
    #[error("only the host can do that")]
    NotHost,

    /// The player is not part of this game.
    #[error("{0} is not a player in this game")]
    NotMember(String),

    /// Player names must not be blank.
    #[error("player name must not be empty")]
    InvalidName,

    /// The ticket does not satisfy the claimed prize.
    #[error("claim for {0} is not valid, check your ticket")]
    InvalidClaim(ClaimKind),

    /// The player already claimed this prize.
    #[error("{0} has already been claimed by you")]
    AlreadyClaimed(ClaimKind),

    /// No rewards are left for this prize.
    #[error("no rewards left for {0}")]
    QuotaExhausted(ClaimKind),

    /// No claim at this index.
    #[error("claim {0} not found")]
    ClaimNotFound(usize),

    /// The claim was already verified or rejected.
    #[error("claim {0} is no longer pending")]
    ClaimNotPending(usize),

    /// Numbers can only be marked after they are called.
    #[error("{0} has not been called yet")]
    NumberNotDrawn(u8),

    /// The number is not on the player's ticket.
    #[error("{0} is not on your ticket")]
    NotOnTicket(u8),

    /// The game cannot end until every number is called.
    #[error("{0} numbers have not been called yet")]
    DrawsRemaining(usize),

    /// A draw was computed against a stale view of the called numbers.
    #[error("draw conflict: expected {expected} called numbers, found {actual}")]
    DrawConflict {
        /// Count the draw was based on.
        expected: usize,
        /// Count found at write time.
        actual: usize,
    },

    /// A conditional update lost against a concurrent one.
    #[error("session changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        /// Version the caller read.
        expected: u64,
        /// Version found at write time.
        actual: u64,
    },

    /// The session store could not apply the operation.
    #[error("session store unavailable")]
    StoreUnavailable,

    /// Ticket could not be issued.
    #[error(transparent)]
    Ticket(#[from] TicketError),
}

/// Result alias for game operations.
pub type GameResult<T> = Result<T, GameError>;
