//! Realtime connection layer: wire message types and the WebSocket client.

pub mod connection;
pub mod messages;

pub use connection::{LIVE_ENDPOINT, LiveConnection, LiveEvent};
pub use messages::{ClientMessage, Content, Part, ServerMessage, Setup};
