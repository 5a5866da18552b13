//! Fixed prompts and request defaults.

/// Model used when neither the caller nor `OPENAI_MODEL` picks one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Low temperature keeps descriptions of the screenshot factual.
pub const TEMPERATURE: f32 = 0.2;

/// System preamble for every capture conversation.
pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. When answering, be concise and reference the attached image when relevant.";

/// System preamble for quick-edit rewrites.
pub const REWRITE_SYSTEM_PROMPT: &str =
    "You are a writing assistant. Only return the transformed text without quotes.";

/// User message for a rewrite request.
pub fn build_rewrite_message(instruction: &str, text: &str) -> String {
    format!("Instruction: {}\n\nText:\n{}", instruction, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_message_layout() {
        let msg = build_rewrite_message("Summarize concisely.", "a\nb");
        assert_eq!(msg, "Instruction: Summarize concisely.\n\nText:\na\nb");
    }
}
