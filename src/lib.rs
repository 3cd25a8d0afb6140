//! Conversational appointment booking over realtime voice and text.
//!
//! The crate wires a microphone and speaker to a bidirectional generative
//! session: user speech streams out as 16 kHz PCM chunks, synthesized
//! replies stream back as 24 kHz audio with transcription on both sides,
//! and the model books or edits appointments by calling declared functions
//! against an in-memory store. A text chat mode shares the same store and
//! dispatch logic through the non-streaming completion endpoint. Committed
//! appointment changes are forwarded to an optional webhook.

pub mod config;
pub mod core;
pub mod errors;

pub use config::{AgentConfig, Language};
pub use errors::{AgentError, AgentResult};
