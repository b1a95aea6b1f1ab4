//! Shared Chat Completions adapter for the OpenAI-wire-compatible providers
//! (DeepSeek, Cerebras, Z.AI, Kimi). Each of those providers speaks the same
//! `/chat/completions` shape OpenAI's older API uses, differing only in base URL,
//! the field name carrying reasoning/thinking content, and how cached-token usage
//! is reported. [`deepseek`], [`cerebras`], [`zai`], [`kimi`] each construct one of
//! these with their own [`Quirks`] rather than duplicating the whole adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::message::{AssistantBlock, Content, ContentBlock, Context, Message, StopReason, Tool, Usage};
use crate::model::{Api, Cost, Model};
use crate::partial_json::parse_partial_json;
use crate::provider::{CompletionOptions, ProviderAdapter, http_client, resolve_api_key};
use crate::sanitize::sanitize_surrogates;
use crate::stream_event::AssistantEvent;

/// Per-provider differences within an otherwise shared Chat Completions dialect.
#[derive(Clone, Copy)]
pub(super) struct Quirks {
    pub api: Api,
    pub default_base_url: &'static str,
    /// The JSON field name carrying reasoning text in a *response* (`reasoning_content`, ...).
    pub reasoning_field: &'static str,
    /// How an outbound `Thinking` block should be re-encoded when this provider is the
    /// target of a cross-provider handoff.
    pub reasoning_encoding: ReasoningEncoding,
    /// How this provider reports already-cached prompt tokens.
    pub cache_field: CacheField,
}

#[derive(Clone, Copy)]
pub(super) enum ReasoningEncoding {
    /// Emit reasoning text under `reasoning_field` as a sibling JSON field on the
    /// assistant message (DeepSeek, Kimi, Z.AI).
    Field,
    /// Prefix the assistant's text content with a `<think>...</think>` tag, the
    /// convention GLM-family models (as hosted by Cerebras) expect in message history.
    ContentTag,
}

#[derive(Clone, Copy)]
pub(super) enum CacheField {
    /// `prompt_cache_hit_tokens` at the top level of `usage` (DeepSeek).
    PromptCacheHitTokens,
    /// `prompt_tokens_details.cached_tokens` (Cerebras, Z.AI).
    PromptTokensDetailsCachedTokens,
    /// `cached_tokens` at the top level of `usage` (Kimi).
    CachedTokens,
}

pub(super) struct OpenAiCompatibleAdapter {
    client: Client,
    quirks: Quirks,
}

impl OpenAiCompatibleAdapter {
    pub(super) fn new(quirks: Quirks) -> Self {
        Self { client: http_client::build(HeaderMap::new()), quirks }
    }

    fn base_url(&self, model: &Model) -> String {
        model.base_url.clone().unwrap_or_else(|| self.quirks.default_base_url.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    /// Holds the provider's native reasoning field (e.g. `reasoning_content`) so an
    /// outbound `Thinking` block round-trips under the same key this provider's own
    /// responses carry it in, rather than being flattened into `content`.
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct ToolCallOut {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionCallOut,
}

#[derive(Debug, Serialize)]
struct FunctionCallOut {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDef,
}

#[derive(Debug, Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

fn render_text(content: &Content) -> String {
    let text: Vec<&str> = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if text.is_empty() { "(see attached)".to_string() } else { text.join("\n") }
}

fn build_messages(context: &Context, quirks: &Quirks) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if let Some(system) = &context.system_prompt {
        messages.push(ChatMessage {
            role: "system",
            content: Some(sanitize_surrogates(system)),
            tool_calls: None,
            tool_call_id: None,
            extra: HashMap::new(),
        });
    }

    for message in &context.messages {
        match message {
            Message::User { content, .. } => {
                messages.push(ChatMessage {
                    role: "user",
                    content: Some(sanitize_surrogates(&render_text(content))),
                    tool_calls: None,
                    tool_call_id: None,
                    extra: HashMap::new(),
                });
            }
            Message::ToolResult { tool_call_id, content, is_error, .. } => {
                let mut text = render_text(content);
                if *is_error {
                    text = format!("[TOOL ERROR] {text}");
                }
                messages.push(ChatMessage {
                    role: "tool",
                    content: Some(sanitize_surrogates(&text)),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                    extra: HashMap::new(),
                });
            }
            Message::Assistant { content, .. } => {
                let mut text_parts = Vec::new();
                let mut reasoning_parts = Vec::new();
                let mut tool_calls = Vec::new();
                for block in content {
                    match block {
                        AssistantBlock::Response { content } => text_parts.push(render_text(content)),
                        AssistantBlock::Thinking { text } => reasoning_parts.push(text.clone()),
                        AssistantBlock::ToolCall { id, name, arguments } => tool_calls.push(ToolCallOut {
                            id: id.clone(),
                            kind: "function",
                            function: FunctionCallOut { name: name.clone(), arguments: serde_json::to_string(arguments).unwrap_or_default() },
                        }),
                    }
                }

                let mut extra = HashMap::new();
                if !reasoning_parts.is_empty() {
                    let reasoning = sanitize_surrogates(&reasoning_parts.join("\n"));
                    match quirks.reasoning_encoding {
                        ReasoningEncoding::Field => {
                            extra.insert(quirks.reasoning_field.to_string(), Value::String(reasoning));
                        }
                        ReasoningEncoding::ContentTag => {
                            text_parts.insert(0, format!("<think>{reasoning}</think>"));
                        }
                    }
                }

                messages.push(ChatMessage {
                    role: "assistant",
                    content: (!text_parts.is_empty()).then(|| sanitize_surrogates(&text_parts.join("\n"))),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    extra,
                });
            }
            Message::Custom { .. } => {}
        }
    }

    messages
}

fn build_request(model: &str, context: &Context, options: &CompletionOptions, supports_tools: bool, quirks: &Quirks, stream: bool) -> ChatRequest {
    let tools = supports_tools.then(|| {
        context
            .tools
            .as_ref()
            .map(|tools| {
                tools
                    .iter()
                    .map(|t: &Tool| FunctionTool {
                        kind: "function",
                        function: FunctionDef { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() },
                    })
                    .collect()
            })
            .unwrap_or_default()
    });

    ChatRequest {
        model: model.to_string(),
        messages: build_messages(context, quirks),
        tools,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        stream,
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    id: String,
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_cache_hit_tokens: u64,
    #[serde(default)]
    cached_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize, Default)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

fn cached_tokens(usage: &ChatUsage, cache_field: CacheField) -> u64 {
    match cache_field {
        CacheField::PromptCacheHitTokens => usage.prompt_cache_hit_tokens,
        CacheField::PromptTokensDetailsCachedTokens => usage.prompt_tokens_details.as_ref().map(|d| d.cached_tokens).unwrap_or(0),
        CacheField::CachedTokens => usage.cached_tokens,
    }
}

fn usage_from(usage: &ChatUsage, cache_field: CacheField, cost: Cost) -> Usage {
    let cached = cached_tokens(usage, cache_field);
    let input = usage.prompt_tokens.saturating_sub(cached);
    Usage::from_components(input, usage.completion_tokens, cached, 0, cost)
}

fn stop_reason_from(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("stop") => StopReason::Stop,
        Some("length") => StopReason::Length,
        Some("tool_calls") => StopReason::ToolUse,
        Some("content_filter") => StopReason::Error,
        Some(other) => {
            log::warn!("unrecognized finish_reason: {other}");
            StopReason::Error
        }
        None => StopReason::Stop,
    }
}

fn content_from(message: &ResponseMessage, reasoning_field: &str) -> AssistantResponse {
    let mut blocks = Vec::new();

    if let Some(reasoning) = message.extra.get(reasoning_field).and_then(Value::as_str)
        && !reasoning.is_empty()
    {
        blocks.push(AssistantBlock::Thinking { text: reasoning.to_string() });
    }

    if let Some(text) = &message.content
        && !text.is_empty()
    {
        blocks.push(AssistantBlock::Response { content: vec![ContentBlock::Text { text: text.clone() }] });
    }

    for call in message.tool_calls.iter().flatten() {
        let arguments: HashMap<String, Value> = parse_partial_json(&call.function.arguments).as_object().cloned().unwrap_or_default().into_iter().collect();
        blocks.push(AssistantBlock::ToolCall { id: call.id.clone(), name: call.function.name.clone(), arguments });
    }

    blocks
}

use crate::message::AssistantResponse;

/// Rebuilds the `{"choices": [{"message": {...}}]}` shape a non-streaming response
/// would have carried, from the accumulated streaming blocks, so a streamed message's
/// `nativeMessage` is populated the same as `complete()`'s raw response body.
fn native_message_from(blocks: &[AssistantBlock], reasoning_field: &str) -> Value {
    let mut message = serde_json::Map::new();
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            AssistantBlock::Response { content } => text_parts.push(render_text(content)),
            AssistantBlock::Thinking { text } => {
                message.insert(reasoning_field.to_string(), Value::String(text.clone()));
            }
            AssistantBlock::ToolCall { id, name, arguments } => {
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string()),
                    },
                }));
            }
        }
    }

    message.insert("role".to_string(), Value::String("assistant".to_string()));
    message.insert("content".to_string(), if text_parts.is_empty() { Value::Null } else { Value::String(text_parts.join("\n")) });
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    serde_json::json!({"choices": [{"message": Value::Object(message)}]})
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let request = build_request(&model.id, context, options, model.supports_function_calling(), &self.quirks, false);
        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url(model)))
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            log::error!("{} chat completions error ({status}): {text}", self.quirks.api.as_str());
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let parsed: ChatResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse {} chat completions payload: {e}", self.quirks.api.as_str());
            LlmError::Protocol("malformed chat completions payload".to_string())
        })?;

        let native_message = serde_json::from_str(&text).unwrap_or(Value::Null);
        let choice = parsed.choices.into_iter().next();
        let (message, finish_reason) = choice.map(|c| (c.message, c.finish_reason)).unwrap_or_default();
        let content = content_from(&message, self.quirks.reasoning_field);
        let has_tool_calls = content.iter().any(|b| matches!(b, AssistantBlock::ToolCall { .. }));
        let stop_reason = stop_reason_from(finish_reason.as_deref(), has_tool_calls);
        let usage = parsed.usage.as_ref().map(|u| usage_from(u, self.quirks.cache_field, model.cost)).unwrap_or_default();

        Ok(Message::Assistant {
            id: id.to_string(),
            api: model.api,
            model: model.id.clone(),
            timestamp: started,
            duration: now_ms().saturating_sub(started),
            stop_reason,
            content,
            usage,
            error_message: None,
            native_message,
        })
    }

    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
        id: &str,
    ) -> Result<crate::stream_event::AssistantEventStream> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let request = build_request(&model.id, context, options, model.supports_function_calling(), &self.quirks, true);
        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url(model)))
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("{} streaming chat completions error ({status}): {text}", self.quirks.api.as_str());
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let (handle, stream) = crate::event_stream::channel();
        handle.push(AssistantEvent::Start);

        let model_id = model.id.clone();
        let api = model.api;
        let cost = model.cost;
        let quirks = self.quirks;
        let cancellation = options.cancellation.clone();
        let message_id = id.to_string();

        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut text_buffer = String::new();
            let mut thinking_buffer = String::new();
            let mut tool_buffers: HashMap<u32, (String, String, String)> = HashMap::new(); // index -> (id, name, args)
            let mut text_started = false;
            let mut thinking_started = false;
            let mut last_usage = None;
            let mut last_finish_reason = None;

            loop {
                if let Some(token) = &cancellation
                    && token.is_cancelled()
                {
                    handle.push(AssistantEvent::Error { reason: StopReason::Aborted, message: "aborted".to_string() });
                    let mut content = Vec::new();
                    if thinking_started {
                        content.push(AssistantBlock::Thinking { text: thinking_buffer });
                    }
                    if text_started {
                        content.push(AssistantBlock::Response { content: vec![ContentBlock::Text { text: text_buffer }] });
                    }
                    let native_message = native_message_from(&content, quirks.reasoning_field);
                    handle.end(Message::Assistant {
                        id: message_id,
                        api,
                        model: model_id,
                        timestamp: started,
                        duration: now_ms().saturating_sub(started),
                        stop_reason: StopReason::Aborted,
                        content,
                        usage: Default::default(),
                        error_message: Some("aborted".to_string()),
                        native_message,
                    });
                    return;
                }

                let Some(event) = events.next().await else { break };
                let Ok(event) = event else {
                    log::warn!("SSE parsing error in {} stream", api.as_str());
                    continue;
                };
                if event.data == "[DONE]" {
                    break;
                }
                let Ok(chunk) = serde_json::from_str::<Value>(&event.data) else {
                    log::warn!("failed to parse {} stream chunk", api.as_str());
                    continue;
                };

                if let Some(usage) = chunk.get("usage")
                    && let Ok(usage) = serde_json::from_value::<ChatUsage>(usage.clone())
                {
                    last_usage = Some(usage);
                }

                let Some(delta) = chunk.pointer("/choices/0/delta") else { continue };
                last_finish_reason = chunk
                    .pointer("/choices/0/finish_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(last_finish_reason);

                if let Some(reasoning) = delta.get(quirks.reasoning_field).and_then(Value::as_str) {
                    if !thinking_started {
                        thinking_started = true;
                        handle.push(AssistantEvent::ThinkingStart { content_index: 0 });
                    }
                    thinking_buffer.push_str(reasoning);
                    handle.push(AssistantEvent::ThinkingDelta { content_index: 0, delta: reasoning.to_string() });
                }

                if let Some(text) = delta.get("content").and_then(Value::as_str) {
                    if !text_started {
                        text_started = true;
                        handle.push(AssistantEvent::TextStart { content_index: 1 });
                    }
                    text_buffer.push_str(text);
                    handle.push(AssistantEvent::TextDelta { content_index: 1, delta: text.to_string() });
                }

                if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for call in tool_calls {
                        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                        let entry = tool_buffers.entry(index).or_insert_with(|| (String::new(), String::new(), String::new()));
                        if let Some(id) = call.get("id").and_then(Value::as_str) {
                            entry.0 = id.to_string();
                            if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                                entry.1 = name.to_string();
                            }
                            handle.push(AssistantEvent::ToolCallStart {
                                content_index: 2 + index as usize,
                                id: entry.0.clone(),
                                name: entry.1.clone(),
                            });
                        }
                        if let Some(args) = call.pointer("/function/arguments").and_then(Value::as_str) {
                            entry.2.push_str(args);
                            handle.push(AssistantEvent::ToolCallDelta {
                                content_index: 2 + index as usize,
                                id: entry.0.clone(),
                                partial_arguments: parse_partial_json(&entry.2),
                            });
                        }
                    }
                }
            }

            let mut content = Vec::new();
            if thinking_started {
                handle.push(AssistantEvent::ThinkingEnd { content_index: 0 });
                content.push(AssistantBlock::Thinking { text: thinking_buffer });
            }
            if text_started {
                handle.push(AssistantEvent::TextEnd { content_index: 1 });
                content.push(AssistantBlock::Response { content: vec![ContentBlock::Text { text: text_buffer }] });
            }
            let mut indices: Vec<u32> = tool_buffers.keys().copied().collect();
            indices.sort_unstable();
            for index in indices {
                let (id, name, args) = tool_buffers.remove(&index).unwrap();
                handle.push(AssistantEvent::ToolCallEnd { content_index: 2 + index as usize, id: id.clone() });
                let arguments: HashMap<String, Value> = parse_partial_json(&args).as_object().cloned().unwrap_or_default().into_iter().collect();
                content.push(AssistantBlock::ToolCall { id, name, arguments });
            }

            let has_tool_calls = content.iter().any(|b| matches!(b, AssistantBlock::ToolCall { .. }));
            let stop_reason = stop_reason_from(last_finish_reason.as_deref(), has_tool_calls);
            handle.push(AssistantEvent::Done { reason: stop_reason });

            let usage = last_usage.as_ref().map(|u| usage_from(u, quirks.cache_field, cost)).unwrap_or_default();
            let native_message = native_message_from(&content, quirks.reasoning_field);
            handle.end(Message::Assistant {
                id: message_id,
                api,
                model: model_id,
                timestamp: started,
                duration: now_ms().saturating_sub(started),
                stop_reason,
                content,
                usage,
                error_message: None,
                native_message,
            });
        });

        Ok(stream)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
