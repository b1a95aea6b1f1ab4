use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::message::{AssistantBlock, AssistantResponse, ContentBlock, StopReason, Usage};
use crate::model::Cost;
use crate::partial_json::parse_partial_json;
use crate::stream_event::AssistantEvent;

#[derive(Debug, Deserialize)]
pub(super) struct MessagesResponse {
    pub id: String,
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub(super) struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

pub(super) fn usage_from(usage: AnthropicUsage, cost: Cost) -> Usage {
    Usage::from_components(
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_read_input_tokens,
        usage.cache_creation_input_tokens,
        cost,
    )
}

pub(super) fn stop_reason_from(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("end_turn" | "stop_sequence" | "pause_turn") => StopReason::Stop,
        Some("max_tokens") => StopReason::Length,
        Some("tool_use") => StopReason::ToolUse,
        Some("refusal") => StopReason::Error,
        Some(other) => {
            log::warn!("unrecognized Anthropic stop_reason: {other}");
            StopReason::Error
        }
        None => StopReason::Stop,
    }
}

/// Rebuilds the `{"content": [...]}` shape a non-streaming response would have carried,
/// so a streamed Anthropic message round-trips through the same-provider passthrough in
/// `input.rs::build_messages` exactly as if it had come back from `complete()`.
pub(super) fn native_message_from(blocks: &[AssistantBlock]) -> Value {
    let content: Vec<Value> = blocks
        .iter()
        .map(|block| match block {
            AssistantBlock::Response { content } => {
                let text = content
                    .iter()
                    .find_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                serde_json::json!({"type": "text", "text": text})
            }
            AssistantBlock::Thinking { text } => serde_json::json!({"type": "thinking", "thinking": text}),
            AssistantBlock::ToolCall { id, name, arguments } => serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": serde_json::to_value(arguments).unwrap_or_default(),
            }),
        })
        .collect();
    serde_json::json!({"content": content})
}

pub(super) fn content_from(blocks: Vec<AnthropicContentBlock>) -> AssistantResponse {
    blocks
        .into_iter()
        .filter_map(|block| match block.kind.as_str() {
            "text" => Some(AssistantBlock::Response {
                content: vec![ContentBlock::Text { text: block.text.unwrap_or_default() }],
            }),
            "thinking" => Some(AssistantBlock::Thinking { text: block.thinking.unwrap_or_default() }),
            "tool_use" => {
                let arguments: HashMap<String, Value> =
                    block.input.and_then(|v| v.as_object().cloned()).unwrap_or_default().into_iter().collect();
                Some(AssistantBlock::ToolCall {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    arguments,
                })
            }
            other => {
                log::debug!("dropping unsupported Anthropic content block type: {other}");
                None
            }
        })
        .collect()
}

// --- Streaming ---
//
// Anthropic's event flow: message_start -> (content_block_start -> content_block_delta* ->
// content_block_stop)* -> message_delta -> message_stop. We drive a small state machine
// over this, the same shape the teacher's AnthropicStreamProcessor uses, generalized to
// emit canonical AssistantEvents instead of unified chunks.

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartPayload },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: usize, content_block: AnthropicContentBlock },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: BlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDeltaData, usage: AnthropicUsage },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error { error: StreamError },
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageStartPayload {
    pub id: String,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageDeltaData {
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamError {
    pub message: String,
}

pub(super) enum StepOutcome {
    Events(Vec<AssistantEvent>),
    Done { stop_reason: Option<String>, usage: AnthropicUsage },
    Error { message: String },
}

pub(super) struct AnthropicStreamProcessor {
    message_id: String,
    current_index: Option<usize>,
    current_kind: CurrentKind,
    tool_arg_buffer: String,
    blocks: Vec<AssistantBlock>,
    text_buffer: String,
    thinking_buffer: String,
    input_tokens: u64,
    cache_read: u64,
    cache_write: u64,
    output_tokens: u64,
}

enum CurrentKind {
    None,
    Text,
    Thinking,
    ToolCall { id: String, name: String },
}

impl AnthropicStreamProcessor {
    pub(super) fn new() -> Self {
        Self {
            message_id: String::new(),
            current_index: None,
            current_kind: CurrentKind::None,
            tool_arg_buffer: String::new(),
            blocks: Vec::new(),
            text_buffer: String::new(),
            thinking_buffer: String::new(),
            input_tokens: 0,
            cache_read: 0,
            cache_write: 0,
            output_tokens: 0,
        }
    }

    pub(super) fn process(&mut self, event: AnthropicStreamEvent) -> StepOutcome {
        let mut out = Vec::new();
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                // input tokens are only ever authoritative here; message_delta never
                // repeats them, so this is the single capture point.
                self.input_tokens = message.usage.input_tokens;
                self.cache_read = message.usage.cache_read_input_tokens;
                self.cache_write = message.usage.cache_creation_input_tokens;
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                self.current_index = Some(index);
                match content_block.kind.as_str() {
                    "text" => {
                        self.current_kind = CurrentKind::Text;
                        self.text_buffer.clear();
                        out.push(AssistantEvent::TextStart { content_index: index });
                    }
                    "thinking" => {
                        self.current_kind = CurrentKind::Thinking;
                        self.thinking_buffer.clear();
                        out.push(AssistantEvent::ThinkingStart { content_index: index });
                    }
                    "tool_use" => {
                        let id = content_block.id.unwrap_or_default();
                        let name = content_block.name.unwrap_or_default();
                        self.tool_arg_buffer.clear();
                        out.push(AssistantEvent::ToolCallStart { content_index: index, id: id.clone(), name: name.clone() });
                        self.current_kind = CurrentKind::ToolCall { id, name };
                    }
                    other => log::debug!("ignoring unsupported Anthropic content_block_start kind: {other}"),
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    self.text_buffer.push_str(&text);
                    out.push(AssistantEvent::TextDelta { content_index: index, delta: text });
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    self.thinking_buffer.push_str(&thinking);
                    out.push(AssistantEvent::ThinkingDelta { content_index: index, delta: thinking });
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    self.tool_arg_buffer.push_str(&partial_json);
                    if let CurrentKind::ToolCall { id, .. } = &self.current_kind {
                        out.push(AssistantEvent::ToolCallDelta {
                            content_index: index,
                            id: id.clone(),
                            partial_arguments: parse_partial_json(&self.tool_arg_buffer),
                        });
                    }
                }
                BlockDelta::SignatureDelta { .. } => {}
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                match std::mem::replace(&mut self.current_kind, CurrentKind::None) {
                    CurrentKind::Text => {
                        self.blocks.push(AssistantBlock::Response {
                            content: vec![ContentBlock::Text { text: std::mem::take(&mut self.text_buffer) }],
                        });
                        out.push(AssistantEvent::TextEnd { content_index: index });
                    }
                    CurrentKind::Thinking => {
                        self.blocks.push(AssistantBlock::Thinking { text: std::mem::take(&mut self.thinking_buffer) });
                        out.push(AssistantEvent::ThinkingEnd { content_index: index });
                    }
                    CurrentKind::ToolCall { id, name } => {
                        let arguments: HashMap<String, Value> = parse_partial_json(&self.tool_arg_buffer)
                            .as_object()
                            .cloned()
                            .unwrap_or_default()
                            .into_iter()
                            .collect();
                        self.blocks.push(AssistantBlock::ToolCall { id: id.clone(), name, arguments });
                        out.push(AssistantEvent::ToolCallEnd { content_index: index, id });
                    }
                    CurrentKind::None => {}
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                self.output_tokens = usage.output_tokens;
                return StepOutcome::Done {
                    stop_reason: delta.stop_reason,
                    usage: AnthropicUsage {
                        input_tokens: self.input_tokens,
                        output_tokens: self.output_tokens,
                        cache_creation_input_tokens: self.cache_write,
                        cache_read_input_tokens: self.cache_read,
                    },
                };
            }
            AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Error { error } => return StepOutcome::Error { message: error.message },
        }
        StepOutcome::Events(out)
    }

    pub(super) fn message_id(&self) -> &str {
        &self.message_id
    }

    pub(super) fn into_blocks(self) -> AssistantResponse {
        self.blocks
    }
}
