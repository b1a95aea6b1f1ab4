//! Context-overflow detection: recognizing when a provider rejected (or silently
//! truncated) a request because it exceeded the model's context window.

use crate::message::{Message, StopReason};

/// Substrings drawn from real provider error bodies, lowercased for matching.
/// Covers Anthropic, OpenAI, Google, xAI, Groq, OpenRouter, llama.cpp and LM Studio.
const OVERFLOW_SUBSTRINGS: &[&str] = &[
    "prompt is too long",
    "exceeds the context window",
    "token count",
    "exceeds the maximum",
    "maximum prompt length",
    "reduce the length of the messages",
    "maximum context length is",
    "exceeds the available context size",
    "greater than the context length",
    "context length exceeded",
    "too many tokens",
    "token limit exceeded",
    "400 status code (no body)",
    "413 status code (no body)",
];

/// `true` if `message` represents (or implies) a context-window overflow.
///
/// Two independent signals: a recognized error substring (providers that reject
/// oversized requests outright), or a `stop` with usage that, in hindsight, reports
/// more input tokens than the model's context window (providers that silently
/// truncate instead of erroring).
pub fn is_context_overflow(message: &Message, context_window: Option<u64>) -> bool {
    let Message::Assistant { stop_reason, error_message, usage, .. } = message else {
        return false;
    };

    match stop_reason {
        StopReason::Error => {
            let Some(error_message) = error_message else { return false };
            let lower = error_message.to_lowercase();
            OVERFLOW_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
        }
        StopReason::Stop => match context_window {
            Some(window) => usage.input + usage.cache_read > window,
            None => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Api;

    fn error_message(text: &str) -> Message {
        Message::Assistant {
            id: "m".into(),
            api: Api::Anthropic,
            model: "claude".into(),
            timestamp: 0,
            duration: 0,
            stop_reason: StopReason::Error,
            content: Vec::new(),
            usage: Default::default(),
            error_message: Some(text.to_string()),
            native_message: serde_json::Value::Null,
        }
    }

    #[test]
    fn recognizes_curated_overflow_fixtures() {
        let fixtures = [
            "prompt is too long: 213462 tokens > 200000 maximum",
            "Error: your input exceeds the context window for this model",
            "400: token count (131075) exceeds the maximum number of tokens allowed (128000)",
            "This model's maximum prompt length is 32768 tokens",
            "Please reduce the length of the messages or completion",
            "This model's maximum context length is 8192 tokens",
            "the request exceeds the available context size",
            "input is greater than the context length of this model",
            "400 Bad Request: context length exceeded",
            "too many tokens in the request",
            "token limit exceeded for this model",
            "400 status code (no body)",
            "413 status code (no body)",
        ];
        for fixture in fixtures {
            assert!(is_context_overflow(&error_message(fixture), None), "expected overflow: {fixture}");
        }
    }

    #[test]
    fn rejects_non_overflow_errors() {
        let fixtures = ["Invalid API key", "Rate limit exceeded", "Connection timeout", "Internal server error"];
        for fixture in fixtures {
            assert!(!is_context_overflow(&error_message(fixture), None), "unexpected overflow: {fixture}");
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_context_overflow(&error_message("PROMPT IS TOO LONG"), None));
    }

    #[test]
    fn detects_silent_truncation_via_usage() {
        let mut message = error_message("irrelevant");
        if let Message::Assistant { stop_reason, usage, error_message, .. } = &mut message {
            *stop_reason = StopReason::Stop;
            *error_message = None;
            usage.input = 210_000;
        }
        assert!(is_context_overflow(&message, Some(200_000)));
    }

    #[test]
    fn stop_under_context_window_is_not_overflow() {
        let mut message = error_message("irrelevant");
        if let Message::Assistant { stop_reason, error_message, usage, .. } = &mut message {
            *stop_reason = StopReason::Stop;
            *error_message = None;
            usage.input = 10_000;
        }
        assert!(!is_context_overflow(&message, Some(200_000)));
    }
}
