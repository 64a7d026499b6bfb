//! Real-time Othello match server.
//!
//! Clients talk JSON over a websocket (`/ws`). A [`RoomRegistry`] owns every
//! live [`MatchSession`]; sessions own their game engine and hand timers,
//! AI searches and result persistence back to [`app::dispatch`].

pub mod app;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod ws;

pub use app::{AppState, SharedState};
pub use config::ServerConfig;
pub use error::{ConfigError, SessionError, StoreError};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::RoomRegistry;
pub use session::MatchSession;
pub use store::{MemoryStore, SqliteStore, Store};
