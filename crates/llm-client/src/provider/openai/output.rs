use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::message::{AssistantBlock, AssistantResponse, ContentBlock, StopReason, Usage};
use crate::model::Cost;
use crate::partial_json::parse_partial_json;
use crate::stream_event::AssistantEvent;

#[derive(Debug, Deserialize)]
pub(super) struct ResponsesResponse {
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    pub usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
pub(super) struct IncompleteDetails {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum OutputItem {
    Message { role: String, content: Vec<OutputContent> },
    FunctionCall { call_id: String, name: String, arguments: String },
    Reasoning { summary: Vec<SummaryText> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(super) struct SummaryText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

pub(super) fn usage_from(usage: &ResponsesUsage, cost: Cost) -> Usage {
    let cached = usage.input_tokens_details.as_ref().map(|d| d.cached_tokens).unwrap_or(0);
    let input = usage.input_tokens.saturating_sub(cached);
    Usage::from_components(input, usage.output_tokens, cached, 0, cost)
}

pub(super) fn stop_reason_from(status: Option<&str>, incomplete: Option<&IncompleteDetails>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match status {
        Some("completed") => StopReason::Stop,
        Some("incomplete") => match incomplete.and_then(|d| d.reason.as_deref()) {
            Some("max_output_tokens") => StopReason::Length,
            _ => StopReason::Length,
        },
        Some("failed") | Some("cancelled") => StopReason::Error,
        _ => StopReason::Stop,
    }
}

/// Rebuilds the `{"output": [...]}` shape a non-streaming response would have carried,
/// from the accumulated streaming blocks, so a streamed message's `nativeMessage` is
/// populated the same as `complete()`'s raw response body.
pub(super) fn native_message_from(blocks: &[AssistantBlock]) -> Value {
    let output: Vec<Value> = blocks
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
                serde_json::json!({
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": text}],
                })
            }
            AssistantBlock::Thinking { text } => serde_json::json!({
                "type": "reasoning",
                "summary": [{"text": text}],
            }),
            AssistantBlock::ToolCall { id, name, arguments } => serde_json::json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string()),
            }),
        })
        .collect();
    serde_json::json!({"output": output})
}

pub(super) fn content_from(output: Vec<OutputItem>) -> AssistantResponse {
    let mut blocks = Vec::new();
    for item in output {
        match item {
            OutputItem::Message { content, .. } => {
                let text: String = content
                    .into_iter()
                    .map(|c| match c {
                        OutputContent::OutputText { text } => text,
                        OutputContent::Refusal { refusal } => refusal,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                blocks.push(AssistantBlock::Response { content: vec![ContentBlock::Text { text }] });
            }
            OutputItem::FunctionCall { call_id, name, arguments } => {
                let parsed = parse_partial_json(&arguments);
                let arguments: HashMap<String, Value> = parsed.as_object().cloned().unwrap_or_default().into_iter().collect();
                blocks.push(AssistantBlock::ToolCall { id: call_id, name, arguments });
            }
            OutputItem::Reasoning { summary } => {
                let text = summary.into_iter().map(|s| s.text).collect::<Vec<_>>().join("\n\n");
                if !text.is_empty() {
                    blocks.push(AssistantBlock::Thinking { text });
                }
            }
            OutputItem::Other => {}
        }
    }
    blocks
}

// --- Streaming ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    Created,
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: StreamItemStub },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { output_index: usize, delta: String },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone { output_index: usize },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningDelta { output_index: usize, delta: String },
    #[serde(rename = "response.reasoning_summary_text.done")]
    ReasoningDone { output_index: usize },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { output_index: usize, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone { output_index: usize },
    #[serde(rename = "response.completed")]
    Completed { response: ResponsesResponse },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponsesResponse },
    #[serde(rename = "response.failed")]
    Failed { response: ResponsesResponse },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamItemStub {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Default)]
enum BlockKind {
    #[default]
    None,
    Text,
    Thinking,
    ToolCall { id: String },
}

/// Tracks the assistant content block currently open for each `output_index`, the
/// same "small loop with an explicit current-block pointer" shape the Anthropic
/// stream processor uses, generalized to OpenAI's index-keyed item stream.
pub(super) struct ResponsesStreamProcessor {
    next_content_index: usize,
    open_blocks: HashMap<usize, (usize, BlockKind)>,
    tool_arg_buffers: HashMap<usize, String>,
    text_buffers: HashMap<usize, String>,
    thinking_buffers: HashMap<usize, String>,
    tool_calls: Vec<AssistantBlock>,
    response_text: Vec<String>,
    thinking_text: Vec<String>,
    usage: Option<ResponsesUsage>,
    model_id: String,
    message_id: String,
}

pub(super) enum StepOutcome {
    Events(Vec<AssistantEvent>),
    Done { usage: Option<ResponsesUsage> },
    Error { message: String },
}

impl ResponsesStreamProcessor {
    pub(super) fn new(model_id: String) -> Self {
        Self {
            next_content_index: 0,
            open_blocks: HashMap::new(),
            tool_arg_buffers: HashMap::new(),
            text_buffers: HashMap::new(),
            thinking_buffers: HashMap::new(),
            tool_calls: Vec::new(),
            response_text: Vec::new(),
            thinking_text: Vec::new(),
            usage: None,
            model_id,
            message_id: String::new(),
        }
    }

    pub(super) fn process(&mut self, event: ResponsesStreamEvent) -> StepOutcome {
        let mut out = Vec::new();
        match event {
            ResponsesStreamEvent::Created => {}
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => match item.kind.as_str() {
                "function_call" => {
                    let id = item.call_id.unwrap_or_default();
                    let content_index = self.alloc_index();
                    self.open_blocks.insert(output_index, (content_index, BlockKind::ToolCall { id: id.clone() }));
                    self.tool_arg_buffers.insert(output_index, String::new());
                    out.push(AssistantEvent::ToolCallStart {
                        content_index,
                        id,
                        name: item.name.unwrap_or_default(),
                    });
                }
                "reasoning" => {
                    let content_index = self.alloc_index();
                    self.open_blocks.insert(output_index, (content_index, BlockKind::Thinking));
                    self.thinking_buffers.insert(output_index, String::new());
                    out.push(AssistantEvent::ThinkingStart { content_index });
                }
                _ => {
                    let content_index = self.alloc_index();
                    self.open_blocks.insert(output_index, (content_index, BlockKind::Text));
                    self.text_buffers.insert(output_index, String::new());
                    out.push(AssistantEvent::TextStart { content_index });
                }
            },
            ResponsesStreamEvent::OutputTextDelta { output_index, delta } => {
                if let Some((content_index, _)) = self.open_blocks.get(&output_index) {
                    self.text_buffers.entry(output_index).or_default().push_str(&delta);
                    out.push(AssistantEvent::TextDelta { content_index: *content_index, delta });
                }
            }
            ResponsesStreamEvent::OutputTextDone { output_index } => {
                if let Some((content_index, _)) = self.open_blocks.remove(&output_index) {
                    let text = self.text_buffers.remove(&output_index).unwrap_or_default();
                    self.response_text.push(text);
                    out.push(AssistantEvent::TextEnd { content_index });
                }
            }
            ResponsesStreamEvent::ReasoningDelta { output_index, delta } => {
                if let Some((content_index, _)) = self.open_blocks.get(&output_index) {
                    self.thinking_buffers.entry(output_index).or_default().push_str(&delta);
                    out.push(AssistantEvent::ThinkingDelta { content_index: *content_index, delta });
                }
            }
            ResponsesStreamEvent::ReasoningDone { output_index } => {
                if let Some((content_index, _)) = self.open_blocks.remove(&output_index) {
                    let text = self.thinking_buffers.remove(&output_index).unwrap_or_default();
                    self.thinking_text.push(text);
                    out.push(AssistantEvent::ThinkingEnd { content_index });
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta { output_index, delta } => {
                if let Some((content_index, BlockKind::ToolCall { id })) = self.open_blocks.get(&output_index) {
                    let buf = self.tool_arg_buffers.entry(output_index).or_default();
                    buf.push_str(&delta);
                    out.push(AssistantEvent::ToolCallDelta {
                        content_index: *content_index,
                        id: id.clone(),
                        partial_arguments: parse_partial_json(buf),
                    });
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDone { output_index } => {
                if let Some((content_index, BlockKind::ToolCall { id })) = self.open_blocks.remove(&output_index) {
                    let buf = self.tool_arg_buffers.remove(&output_index).unwrap_or_default();
                    let arguments: HashMap<String, Value> =
                        parse_partial_json(&buf).as_object().cloned().unwrap_or_default().into_iter().collect();
                    self.tool_calls.push(AssistantBlock::ToolCall { id: id.clone(), name: String::new(), arguments });
                    out.push(AssistantEvent::ToolCallEnd { content_index, id });
                }
            }
            ResponsesStreamEvent::Completed { response } | ResponsesStreamEvent::Incomplete { response } => {
                self.message_id = response.id;
                return StepOutcome::Done { usage: response.usage };
            }
            ResponsesStreamEvent::Failed { response } => {
                return StepOutcome::Error {
                    message: response
                        .incomplete_details
                        .and_then(|d| d.reason)
                        .unwrap_or_else(|| "response failed".to_string()),
                };
            }
            ResponsesStreamEvent::Other => {}
        }
        StepOutcome::Events(out)
    }

    fn alloc_index(&mut self) -> usize {
        let i = self.next_content_index;
        self.next_content_index += 1;
        i
    }

    pub(super) fn model_id(&self) -> &str {
        &self.model_id
    }

    pub(super) fn message_id(&self) -> &str {
        &self.message_id
    }

    pub(super) fn into_assistant_response(self) -> AssistantResponse {
        let mut blocks = Vec::new();
        for text in self.thinking_text {
            blocks.push(AssistantBlock::Thinking { text });
        }
        for text in self.response_text {
            blocks.push(AssistantBlock::Response { content: vec![ContentBlock::Text { text }] });
        }
        blocks.extend(self.tool_calls);
        blocks
    }
}
