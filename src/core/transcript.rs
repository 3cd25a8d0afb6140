//! Conversation turns and live-transcript aggregation.
//!
//! The backend streams partial speech-to-text fragments for both directions
//! of a live session. The aggregator accumulates them per speaker and, on
//! the backend's turn-complete signal, materializes finalized
//! [`ConversationTurn`]s and resets.

use time::OffsetDateTime;
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// One finalized utterance attributed to a single speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: OffsetDateTime,
}

impl ConversationTurn {
    /// Build a turn stamped with the current time.
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            text: text.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Append-only sequence of turns in display order.
///
/// Cleared wholesale by [`Conversation::reset`], never partially.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop every turn. Only legal while no session is open; the session
    /// controller enforces that.
    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

/// Two independent text accumulators, one per speaker direction.
///
/// Scoped to one open session; not persisted.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    assistant: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate a fragment onto the buffer for the given speaker and
    /// return the buffer's current value, for live display.
    pub fn append(&mut self, speaker: Speaker, delta: &str) -> &str {
        let buffer = match speaker {
            Speaker::User => &mut self.user,
            Speaker::Assistant => &mut self.assistant,
        };
        buffer.push_str(delta);
        buffer
    }

    /// Current buffer contents for one speaker.
    pub fn current(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Assistant => &self.assistant,
        }
    }

    /// Convert each non-empty buffer (trimmed) into a finalized turn with a
    /// shared timestamp, user before assistant, then clear both buffers.
    ///
    /// Called exactly once per backend turn-complete signal.
    pub fn flush(&mut self) -> Vec<ConversationTurn> {
        let timestamp = OffsetDateTime::now_utc();
        let mut turns = Vec::with_capacity(2);

        let user_text = self.user.trim();
        if !user_text.is_empty() {
            turns.push(ConversationTurn {
                id: Uuid::new_v4(),
                speaker: Speaker::User,
                text: user_text.to_string(),
                timestamp,
            });
        }
        let assistant_text = self.assistant.trim();
        if !assistant_text.is_empty() {
            turns.push(ConversationTurn {
                id: Uuid::new_v4(),
                speaker: Speaker::Assistant,
                text: assistant_text.to_string(),
                timestamp,
            });
        }

        self.user.clear();
        self.assistant.clear();
        turns
    }

    /// Clear both buffers without producing turns.
    pub fn reset(&mut self) {
        self.user.clear();
        self.assistant.clear();
    }
}
