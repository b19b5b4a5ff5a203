//! Network Layer
//!
//! WebSocket server, session store and draw scheduling.
//! Game rules live in `game/`; this layer owns state, time and I/O.

pub mod protocol;
pub mod session;
pub mod cards;
pub mod sequencer;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode, JoinedInfo};
pub use session::{SessionStore, SessionHandle};
pub use cards::CardStore;
pub use sequencer::DrawScheduler;
pub use server::{GameServer, ServerConfig, GameServerError};
