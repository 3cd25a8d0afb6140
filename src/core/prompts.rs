//! System instructions for the booking assistant.
//!
//! Confirmation-before-action is a conversational contract: the backend is
//! instructed to summarize and obtain explicit user confirmation before it
//! may call a function. The dispatcher trusts that contract and performs no
//! additional gate of its own.

use crate::config::Language;

/// Shared booking protocol, voice and text alike.
const CONFIRMATION_PROTOCOL: &str = "Your process for booking or editing an appointment MUST follow these steps strictly:
1.  **Gather Information**: Collect all necessary details from the user (e.g., patient name, date, time, changes for an edit).
2.  **Summarize and Confirm**: Once you have all the details, you MUST summarize them back to the user and ask for their explicit confirmation before proceeding. For example: \"Okay, I have an appointment for Jane Doe on September 1st, 2024 at 3 PM with Dr. Smith. Is that correct and should I finalize it?\".
3.  **Wait for Confirmation**: Do not proceed until the user gives a clear positive confirmation (e.g., \"Yes, that's correct\", \"Confirm\", \"Go ahead\").
4.  **Finalize**: Only after receiving the user's confirmation, you are allowed to call the 'bookAppointment' or 'editAppointment' function.
**NEVER call a function before getting explicit confirmation from the user.**";

/// System instruction for the realtime voice session, embedding the active
/// dialogue language.
pub fn live_system_instruction(language: Language) -> String {
    format!(
        "You are an AI assistant for booking doctor's appointments. {CONFIRMATION_PROTOCOL}

**CRITICAL LANGUAGE CONSTRAINT: You must ONLY speak English or Urdu.** Under NO circumstances should you use Hindi or any other language. If the user speaks another language, politely ask them to use English or Urdu.
You MUST respond in the same language the user is speaking. The current user's preferred language is {}.",
        language.display_name()
    )
}

/// System instruction for the non-streaming text path.
pub fn text_system_instruction() -> String {
    format!("You are a text-based AI assistant for booking doctor's appointments. {CONFIRMATION_PROTOCOL}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_instruction_embeds_language() {
        let en = live_system_instruction(Language::English);
        assert!(en.contains("preferred language is English"));
        let ur = live_system_instruction(Language::Urdu);
        assert!(ur.contains("preferred language is Urdu"));
        assert!(en.contains("NEVER call a function before"));
    }

    #[test]
    fn test_text_instruction_has_protocol_without_language_clause() {
        let text = text_system_instruction();
        assert!(text.contains("NEVER call a function before"));
        assert!(!text.contains("preferred language"));
    }
}
