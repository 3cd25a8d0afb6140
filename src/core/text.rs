//! Non-streaming text path.
//!
//! A typed message becomes a user turn; the full turn history plus the two
//! function declarations and the text-variant system instruction go to the
//! `generateContent` endpoint in one request. Returned function calls run
//! through the same intent dispatcher as the voice path, each producing one
//! assistant turn; trailing free-form text becomes one more. Any transport
//! or backend failure is converted into exactly one apologetic assistant
//! turn at this boundary and never propagates further.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::core::intents::{FunctionCall, IntentDispatcher, declarations};
use crate::core::live::messages::{Content, Part, Tool};
use crate::core::prompts::text_system_instruction;
use crate::core::transcript::{Conversation, ConversationTurn, Speaker};
use crate::errors::{AgentError, AgentResult};

/// Default REST endpoint for non-streaming completion calls.
pub const GENERATE_CONTENT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Reply used when the completion call fails for any reason.
const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Request body for `models/{model}:generateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    tools: Vec<Tool>,
    system_instruction: Content,
}

/// Response body of `generateContent`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateResponse {
    /// Function calls across all parts of the first candidate, in order.
    fn function_calls(&self) -> Vec<FunctionCall> {
        self.first_parts()
            .iter()
            .filter_map(|p| p.function_call.clone())
            .collect()
    }

    /// Concatenated free-form text of the first candidate.
    fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }
}

/// Handles one typed message end to end.
pub struct TextTurnHandler {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dispatcher: IntentDispatcher,
    conversation: Arc<Mutex<Conversation>>,
}

impl TextTurnHandler {
    pub fn new(
        config: &AgentConfig,
        dispatcher: IntentDispatcher,
        conversation: Arc<Mutex<Conversation>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: GENERATE_CONTENT_ENDPOINT.to_string(),
            api_key: config.api_key.clone(),
            model: config.text_model.clone(),
            dispatcher,
            conversation,
        }
    }

    /// Override the endpoint base URL. Used by tests to point at a local
    /// mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Process one typed message and return every turn appended to the
    /// conversation (the user turn plus all assistant turns).
    pub async fn send_message(&self, message: &str) -> Vec<ConversationTurn> {
        let user_turn = ConversationTurn::now(Speaker::User, message);
        let contents = {
            let mut conversation = self.conversation.lock();
            conversation.push(user_turn.clone());
            conversation
                .turns()
                .iter()
                .map(|turn| Content {
                    role: Some(
                        match turn.speaker {
                            Speaker::User => "user",
                            Speaker::Assistant => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![Part::text(turn.text.clone())],
                })
                .collect::<Vec<_>>()
        };

        let mut new_turns = vec![user_turn];
        match self.complete(contents).await {
            Ok(response) => {
                for call in response.function_calls() {
                    let result = self.dispatcher.dispatch(&call);
                    new_turns.push(ConversationTurn::now(Speaker::Assistant, result));
                }
                let text = response.text();
                let text = text.trim();
                if !text.is_empty() {
                    new_turns.push(ConversationTurn::now(Speaker::Assistant, text));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "completion call failed");
                new_turns.push(ConversationTurn::now(Speaker::Assistant, FALLBACK_REPLY));
            }
        }

        self.conversation
            .lock()
            .extend(new_turns[1..].iter().cloned());
        new_turns
    }

    async fn complete(&self, contents: Vec<Content>) -> AgentResult<GenerateResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );
        let body = GenerateRequest {
            contents,
            tools: vec![Tool {
                function_declarations: declarations(),
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(text_system_instruction())],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentError::Transport(format!(
                "completion endpoint responded {}",
                response.status()
            )));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::appointments::AppointmentStore;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn handler_with(endpoint: String) -> (TextTurnHandler, Arc<Mutex<AppointmentStore>>) {
        let (store, _rx) = AppointmentStore::new();
        let store = Arc::new(Mutex::new(store));
        let config = AgentConfig {
            api_key: "test-key".to_string(),
            live_model: "live".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            voice: "Zephyr".to_string(),
            language: crate::config::Language::English,
            webhook_url: None,
        };
        let conversation = Arc::new(Mutex::new(Conversation::new()));
        let handler = TextTurnHandler::new(
            &config,
            IntentDispatcher::new(store.clone()),
            conversation,
        )
        .with_endpoint(endpoint);
        (handler, store)
    }

    #[tokio::test]
    async fn test_reply_text_becomes_one_assistant_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/gemini-2\.5-flash:generateContent$"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Hi! How can I help?" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (handler, _store) = handler_with(server.uri());
        let turns = handler.send_message("hello").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, Speaker::User);
        assert_eq!(turns[1].speaker, Speaker::Assistant);
        assert_eq!(turns[1].text, "Hi! How can I help?");
    }

    #[tokio::test]
    async fn test_function_calls_dispatched_in_order_then_trailing_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [
                    { "functionCall": { "name": "bookAppointment", "args": {
                        "name": "Jane Doe", "email": "jane@example.com",
                        "date": "2024-09-01", "time": "3 PM",
                        "doctor": "Dr. Smith", "clinic": "Downtown Clinic"
                    } } },
                    { "text": "All set!" }
                ] } }]
            })))
            .mount(&server)
            .await;

        let (handler, store) = handler_with(server.uri());
        let turns = handler.send_message("yes, confirm").await;
        assert_eq!(turns.len(), 3);
        assert!(turns[1].text.starts_with("Appointment booked successfully"));
        assert_eq!(turns[2].text, "All set!");
        assert_eq!(store.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_yields_exactly_one_apologetic_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (handler, store) = handler_with(server.uri());
        let turns = handler.send_message("hello").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, FALLBACK_REPLY);
        assert!(store.lock().is_empty());
    }

    #[tokio::test]
    async fn test_history_accumulates_across_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }]
            })))
            .mount(&server)
            .await;

        let (handler, _store) = handler_with(server.uri());
        handler.send_message("first").await;
        let turns = handler.send_message("second").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(handler.conversation.lock().turns().len(), 4);
    }
}
