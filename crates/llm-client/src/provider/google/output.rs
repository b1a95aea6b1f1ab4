use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::message::{AssistantBlock, AssistantResponse, ContentBlock, StopReason, Usage};
use crate::model::Cost;

#[derive(Debug, Deserialize, Default)]
pub(super) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Candidate {
    #[serde(default)]
    pub content: Option<GoogleContent>,
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GoogleContent {
    #[serde(default)]
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct GooglePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<bool>,
    #[serde(rename = "functionCall", default)]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(super) struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub thoughts_token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
}

pub(super) fn usage_from(usage: &UsageMetadata, cost: Cost) -> Usage {
    let input = usage.prompt_token_count.saturating_sub(usage.cached_content_token_count);
    let output = usage.candidates_token_count + usage.thoughts_token_count;
    Usage::from_components(input, output, usage.cached_content_token_count, 0, cost)
}

pub(super) fn stop_reason_from(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("STOP") => StopReason::Stop,
        Some("MAX_TOKENS") => StopReason::Length,
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "OTHER") => StopReason::Error,
        Some(other) => {
            log::warn!("unrecognized Google finishReason: {other}");
            StopReason::Error
        }
        None => StopReason::Stop,
    }
}

/// Rebuilds the `{"candidates": [{"content": {"parts": [...]}}]}` shape a non-streaming
/// response would have carried, from the accumulated streaming blocks, so a streamed
/// message's `nativeMessage` is populated the same as `complete()`'s raw response body.
pub(super) fn native_message_from(blocks: &[AssistantBlock]) -> Value {
    let parts: Vec<Value> = blocks
        .iter()
        .map(|block| match block {
            AssistantBlock::Response { content } => {
                let text = content
                    .iter()
                    .find_map(|c| match c {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                serde_json::json!({"text": text})
            }
            AssistantBlock::Thinking { text } => serde_json::json!({"text": text, "thought": true}),
            AssistantBlock::ToolCall { name, arguments, .. } => serde_json::json!({
                "functionCall": {"name": name, "args": arguments},
            }),
        })
        .collect();
    serde_json::json!({"candidates": [{"content": {"parts": parts}}]})
}

pub(super) fn content_from(candidate: Option<Candidate>) -> AssistantResponse {
    let Some(parts) = candidate.and_then(|c| c.content).map(|c| c.parts) else {
        return Vec::new();
    };

    parts
        .into_iter()
        .map(|part| {
            if let Some(call) = part.function_call {
                let arguments: HashMap<String, Value> = call.args.as_object().cloned().unwrap_or_default().into_iter().collect();
                AssistantBlock::ToolCall { id: format!("call_{}", uuid::Uuid::new_v4()), name: call.name, arguments }
            } else if part.thought == Some(true) {
                AssistantBlock::Thinking { text: part.text.unwrap_or_default() }
            } else {
                AssistantBlock::Response { content: vec![ContentBlock::Text { text: part.text.unwrap_or_default() }] }
            }
        })
        .collect()
}
