use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Api, Cost};

/// One block of a [`Content`] sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { data: String, mime_type: String },
    File {
        data: String,
        mime_type: String,
        filename: String,
    },
}

/// An ordered sequence of content blocks.
pub type Content = Vec<ContentBlock>;

/// Why a model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

/// Token and cost accounting for one assistant turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: UsageCost,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

impl Usage {
    /// Build a `Usage` from raw token components, deriving `total_tokens` and cost.
    pub fn from_components(input: u64, output: u64, cache_read: u64, cache_write: u64, cost: Cost) -> Self {
        let total_tokens = input + output + cache_read + cache_write;

        let cost = UsageCost {
            input: input as f64 * cost.input / 1_000_000.0,
            output: output as f64 * cost.output / 1_000_000.0,
            cache_read: cache_read as f64 * cost.cache_read / 1_000_000.0,
            cache_write: cache_write as f64 * cost.cache_write / 1_000_000.0,
            total: 0.0,
        };

        let total = cost.input + cost.output + cost.cache_read + cost.cache_write;

        Self {
            input,
            output,
            cache_read,
            cache_write,
            total_tokens,
            cost: UsageCost { total, ..cost },
        }
    }
}

/// One block of an assistant's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Response { content: Content },
    Thinking { text: String },
    ToolCall {
        id: String,
        name: String,
        arguments: HashMap<String, Value>,
    },
}

/// An ordered sequence of assistant blocks.
pub type AssistantResponse = Vec<AssistantBlock>;

/// An error captured alongside a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub message: String,
    pub name: Option<String>,
    pub stack: Option<String>,
}

/// A single entry in a conversation's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        content: Content,
        timestamp: Option<u64>,
    },
    ToolResult {
        id: String,
        tool_call_id: String,
        tool_name: String,
        content: Content,
        is_error: bool,
        error: Option<ToolError>,
        details: Option<Value>,
        timestamp: u64,
    },
    Assistant {
        id: String,
        api: Api,
        model: String,
        timestamp: u64,
        duration: u64,
        stop_reason: StopReason,
        content: AssistantResponse,
        usage: Usage,
        error_message: Option<String>,
        /// The adapter's wire-native form of this message, preserved so that
        /// re-sending to the same provider can reuse it verbatim.
        native_message: Value,
    },
    Custom {
        id: String,
        payload: Value,
        timestamp: u64,
    },
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. }
            | Message::ToolResult { id, .. }
            | Message::Assistant { id, .. }
            | Message::Custom { id, .. } => id,
        }
    }

    /// `true` if this assistant message's final content contains a tool call and its
    /// stop reason reflects that — the invariant every adapter must uphold.
    pub fn is_tool_use(&self) -> bool {
        match self {
            Message::Assistant { stop_reason, content, .. } => {
                *stop_reason == StopReason::ToolUse
                    && content.iter().any(|b| matches!(b, AssistantBlock::ToolCall { .. }))
            }
            _ => false,
        }
    }

    pub fn tool_calls(&self) -> Vec<(&str, &str, &HashMap<String, Value>)> {
        match self {
            Message::Assistant { content, .. } => content
                .iter()
                .filter_map(|b| match b {
                    AssistantBlock::ToolCall { id, name, arguments } => Some((id.as_str(), name.as_str(), arguments)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A tool the model may call, described as a JSON Schema parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The full conversational context sent to an adapter for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<Tool>>,
}
