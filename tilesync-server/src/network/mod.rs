//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all simulation runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode};
pub use session::{MapSession, MapId, SessionConfig, SessionManager, SessionError};
pub use server::{GameServer, ServerConfig, GameServerError};
