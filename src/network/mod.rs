//! Network Layer
//!
//! WebSocket transport for player connections.
//! This layer owns no game rules; everything is routed through `service`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, SignedInPlayer, SigningKey};
pub use protocol::{ClientMessage, ServerMessage, Request, Response, ErrorCode};
pub use server::{GameServer, GameServerError, Connection};
