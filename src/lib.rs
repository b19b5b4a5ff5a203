//! # Tambola Game Server
//!
//! Authoritative server for multiplayer Tambola (Housie) games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TAMBOLA SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Seedable primitives                     │
//! │  └── rng.rs        - Xorshift128+ PRNG, game codes           │
//! │                                                              │
//! │  game/             - Game rules (pure, no I/O)               │
//! │  ├── ticket.rs     - 3x9 ticket layout and generation        │
//! │  ├── claims.rs     - Prize predicates                        │
//! │  ├── card.rs       - Ticket plus a player's marks            │
//! │  ├── state.rs      - Shared session document                 │
//! │  ├── draw.rs       - Number calling and cadence              │
//! │  ├── arbitration.rs- Claim submit / verify / reject          │
//! │  ├── scoring.rs    - Points and leaderboard                  │
//! │  └── events.rs     - Client notifications                    │
//! │                                                              │
//! │  network/          - State, time and I/O                     │
//! │  ├── session.rs    - Transactional session store             │
//! │  ├── cards.rs      - Per-player card store                   │
//! │  ├── sequencer.rs  - One draw task per session               │
//! │  ├── protocol.rs   - Message types                           │
//! │  └── server.rs     - WebSocket server                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every session document is owned by the server. All writes are
//! transactions on a draft copy that either commit and bump the document
//! version or leave it untouched, so the last reward of a prize can only
//! be handed out once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::{ClaimKind, GameError, GameSession, PlayerCard, RewardConfig, Ticket};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Highest number called in a game; numbers run from 1.
pub const MAX_NUMBER: u8 = 90;

/// Rows on a ticket.
pub const TICKET_ROWS: usize = 3;

/// Columns on a ticket.
pub const TICKET_COLUMNS: usize = 9;

/// Filled cells per ticket row.
pub const NUMBERS_PER_ROW: usize = 5;

/// Default time between two calls (ms).
pub const DEFAULT_DRAW_INTERVAL_MS: u64 = 5_000;

/// Shortest wait before a call when resuming late (ms).
pub const MIN_DRAW_DELAY_MS: u64 = 100;
