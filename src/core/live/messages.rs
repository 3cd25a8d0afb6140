//! BidiGenerateContent WebSocket message types.
//!
//! All messages are JSON-encoded over the WebSocket, camelCase on the wire.
//!
//! Client messages (sent to server):
//! - setup - negotiated session configuration, first message on the socket
//! - realtimeInput - base64 PCM media chunks from the microphone
//! - toolResponse - results for previously issued function calls
//!
//! Server messages (received):
//! - setupComplete - session accepted, streaming may begin
//! - serverContent - transcription deltas, synthesized audio parts,
//!   turn-complete signal
//! - toolCall - function calls to execute
//! - goAway - imminent server-side close
//!
//! Unknown fields are tolerated; unknown message kinds decode to a message
//! with every option empty and are logged by the connection loop.

use serde::{Deserialize, Serialize};

use crate::core::intents::{FunctionCall, FunctionDeclaration};

// =============================================================================
// Client Messages (sent to server)
// =============================================================================

/// Client messages sent over the realtime connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration, must be the first message on the socket.
    Setup(Setup),
    /// Outbound media chunk(s).
    RealtimeInput(RealtimeInput),
    /// Function call results.
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Build a one-chunk realtime media message from base64 PCM data.
    pub fn media_chunk(mime_type: &str, data: String) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data,
            }],
        })
    }

    /// Build a single-result tool response tagged with the originating
    /// call's identifier.
    pub fn tool_result(id: Option<String>, name: &str, result: String) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id,
                name: name.to_string(),
                response: FunctionResult { result },
            }],
        })
    }
}

/// Session configuration negotiated at connection open.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully-qualified model resource name, e.g. `models/gemini-...`.
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
    /// Presence enables transcription of inbound user speech.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    /// Presence enables transcription of synthesized output speech.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

impl Setup {
    /// Standard setup for a booking session: audio responses, transcription
    /// in both directions, the two intent declarations, a fixed voice.
    pub fn new(
        model: &str,
        voice: &str,
        system_instruction: String,
        declarations: Vec<FunctionDeclaration>,
    ) -> Self {
        Self {
            model: format!("models/{model}"),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                }),
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(system_instruction)],
            },
            tools: vec![Tool {
                function_declarations: declarations,
            }],
            input_audio_transcription: Some(TranscriptionConfig {}),
            output_audio_transcription: Some(TranscriptionConfig {}),
        }
    }
}

/// Generation parameters for the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Synthesized-voice selection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker object; presence in the setup enables the feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

/// Tool registration: a set of function declarations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Outbound media chunk batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64-encoded media chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// Function call results sent back to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result of one function call, tagged with its identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: FunctionResult,
}

/// The textual result payload relayed into the dialogue.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionResult {
    pub result: String,
}

// =============================================================================
// Shared Content Types
// =============================================================================

/// Role-tagged content, also used by the non-streaming completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part: free text, inline media, or a function call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// Inline base64 media payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

// =============================================================================
// Server Messages (received)
// =============================================================================

/// One message from the server. Kinds are expressed as optional sections
/// rather than an enum because the server may combine them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

impl ServerMessage {
    /// True when the message carries nothing this agent understands.
    pub fn is_empty(&self) -> bool {
        self.setup_complete.is_none()
            && self.server_content.is_none()
            && self.tool_call.is_none()
            && self.go_away.is_none()
    }
}

/// Streaming content from the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Transcription delta of inbound user speech.
    #[serde(default)]
    pub input_transcription: Option<TranscriptionDelta>,
    /// Transcription delta of synthesized output speech.
    #[serde(default)]
    pub output_transcription: Option<TranscriptionDelta>,
    /// Model output parts; synthesized audio arrives as inline data.
    #[serde(default)]
    pub model_turn: Option<Content>,
    /// The current dialogue turn is complete.
    #[serde(default)]
    pub turn_complete: Option<bool>,
    /// Generation was interrupted by new user speech.
    #[serde(default)]
    pub interrupted: Option<bool>,
}

/// One speech-to-text fragment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionDelta {
    #[serde(default)]
    pub text: String,
}

/// Function calls issued by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}
