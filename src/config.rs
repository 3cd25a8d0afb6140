//! Agent configuration loaded from environment variables.
//!
//! `.env` files are honored when present (loaded by the binary before
//! anything else). Priority: process environment > `.env` values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use medibook::config::AgentConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::from_env()?;
//! println!("live model: {}", config.live_model);
//! # Ok(())
//! # }
//! ```

use crate::errors::{AgentError, AgentResult};

/// Default model for the realtime audio session.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default model for the non-streaming text path.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Default synthesized voice for audio responses.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Dialogue languages the agent is allowed to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    /// English (en-US)
    #[default]
    English,
    /// Urdu (ur-PK)
    Urdu,
}

impl Language {
    /// BCP-47 tag used in configuration.
    pub fn tag(&self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Urdu => "ur-PK",
        }
    }

    /// Human-readable name, interpolated into the system instruction.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Urdu => "Urdu",
        }
    }

    fn parse(value: &str) -> AgentResult<Self> {
        match value {
            "en-US" | "en" | "english" => Ok(Language::English),
            "ur-PK" | "ur" | "urdu" => Ok(Language::Urdu),
            other => Err(AgentError::InvalidConfiguration(format!(
                "unsupported language '{other}' (expected en-US or ur-PK)"
            ))),
        }
    }
}

/// Configuration for one agent instance.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Backend API credential. Required for both the realtime session and
    /// the text path.
    pub api_key: String,

    /// Model for the realtime audio session.
    pub live_model: String,

    /// Model for the non-streaming completion call.
    pub text_model: String,

    /// Fixed synthesized-voice selection for audio responses.
    pub voice: String,

    /// Active dialogue language.
    pub language: Language,

    /// Webhook endpoint for appointment change events. When absent, change
    /// events are drained and dropped.
    pub webhook_url: Option<String>,
}

impl AgentConfig {
    /// Load the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingCredential`] if `GEMINI_API_KEY` is not
    /// set, or [`AgentError::InvalidConfiguration`] for unparseable values.
    pub fn from_env() -> AgentResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AgentError::MissingCredential("GEMINI_API_KEY".into()))?;

        let language = match std::env::var("MEDIBOOK_LANGUAGE") {
            Ok(value) => Language::parse(value.trim())?,
            Err(_) => Language::default(),
        };

        let webhook_url = std::env::var("MEDIBOOK_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if let Some(ref raw) = webhook_url {
            url::Url::parse(raw).map_err(|e| {
                AgentError::InvalidConfiguration(format!("MEDIBOOK_WEBHOOK_URL: {e}"))
            })?;
        }

        Ok(Self {
            api_key,
            live_model: env_or("MEDIBOOK_LIVE_MODEL", DEFAULT_LIVE_MODEL),
            text_model: env_or("MEDIBOOK_TEXT_MODEL", DEFAULT_TEXT_MODEL),
            voice: env_or("MEDIBOOK_VOICE", DEFAULT_VOICE),
            language,
            webhook_url,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
