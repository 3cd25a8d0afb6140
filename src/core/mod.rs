//! Core engine of the booking assistant.
//!
//! The voice path runs through [`session::SessionController`]: capture
//! frames go out as media chunks, server events come back as transcripts,
//! synthesized audio and function calls. The text path runs through
//! [`text::TextTurnHandler`] against the non-streaming completion endpoint.
//! Both paths share the [`appointments::AppointmentStore`] behind the same
//! [`intents::IntentDispatcher`], so a booking made by voice can be edited
//! by text and vice versa.

pub mod appointments;
pub mod audio;
pub mod intents;
pub mod live;
pub mod prompts;
pub mod session;
pub mod text;
pub mod transcript;
pub mod webhook;

pub use appointments::{Appointment, AppointmentChangeEvent, AppointmentStore};
pub use intents::IntentDispatcher;
pub use session::{SessionController, SessionEvent, SessionState};
pub use text::TextTurnHandler;
pub use transcript::{Conversation, ConversationTurn, Speaker};
pub use webhook::WebhookSink;
