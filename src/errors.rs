//! Error taxonomy for the medibook agent.
//!
//! Every I/O failure is caught at the boundary that invoked it and converted
//! into either a state transition or a single user-facing message; nothing in
//! this enum is allowed to escape as an unhandled task panic.

use thiserror::Error;

/// Errors that can occur while running the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Microphone permission or hardware failure. Fatal to starting a
    /// session; the controller stays in (or returns to) `Idle`.
    #[error("Audio device access failed: {0}")]
    DeviceAccess(String),

    /// Realtime connection failure, at open or mid-session. Triggers full
    /// teardown; recoverable by retrying `start`.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Store lookup on an unknown appointment id. Internal only: the intent
    /// dispatcher translates this into a conversational message instead of
    /// surfacing it.
    #[error("Appointment not found: {0}")]
    NotFound(uuid::Uuid),

    /// Webhook delivery failure. Logged and otherwise swallowed; never
    /// affects appointment or conversation state.
    #[error("Webhook delivery failed: {0}")]
    SinkDelivery(String),

    /// Failure of the non-streaming completion call. Caught at the text
    /// turn handler boundary and converted into one apologetic turn.
    #[error("Completion request failed: {0}")]
    Transport(String),

    /// Malformed or unserializable wire message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend API credential is missing. Blocks both the realtime
    /// session and the text path.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::DeviceAccess("no default input device".into());
        assert!(err.to_string().contains("Audio device access failed"));

        let err = AgentError::MissingCredential("GEMINI_API_KEY".into());
        assert_eq!(err.to_string(), "Missing credential: GEMINI_API_KEY");
    }
}
