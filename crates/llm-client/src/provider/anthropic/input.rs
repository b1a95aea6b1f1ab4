use serde::Serialize;
use serde_json::Value;

use crate::message::{AssistantBlock, Content, ContentBlock, Context, Message, Tool};
use crate::model::Modality;
use crate::provider::CompletionOptions;
use crate::sanitize::sanitize_surrogates;

#[derive(Debug, Serialize)]
pub(super) struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    pub max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
pub(super) struct CacheControl {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicContent {
    Text { text: String },
    Image { source: ImageSource },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    Thinking { thinking: String },
}

#[derive(Debug, Serialize)]
pub(super) struct ImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub(super) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Claude-Code identity block Anthropic requires ahead of the user system prompt
/// when authenticating with an OAuth token rather than a raw API key.
pub(super) const CLAUDE_CODE_IDENTITY: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

pub(super) fn is_oauth_token(key: &str) -> bool {
    key.starts_with("sk-ant-oat")
}

pub(super) fn build_request(
    model: &str,
    context: &Context,
    options: &CompletionOptions,
    supports_function_calling: bool,
    input_modalities: &std::collections::HashSet<Modality>,
    is_oauth: bool,
    stream: bool,
) -> MessagesRequest {
    let mut system = Vec::new();
    if is_oauth {
        system.push(SystemBlock { kind: "text", text: CLAUDE_CODE_IDENTITY.to_string(), cache_control: None });
    }
    if let Some(prompt) = &context.system_prompt {
        system.push(SystemBlock {
            kind: "text",
            text: sanitize_surrogates(prompt),
            cache_control: Some(CacheControl { kind: "ephemeral" }),
        });
    }

    let messages = build_messages(context, input_modalities);

    let tools = supports_function_calling.then(|| {
        context
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(tool_to_anthropic).collect())
            .unwrap_or_default()
    });

    MessagesRequest {
        model: model.to_string(),
        messages,
        system: (!system.is_empty()).then_some(system),
        tools,
        max_tokens: options.max_tokens.unwrap_or(4096),
        temperature: options.temperature,
        stream,
    }
}

fn build_messages(context: &Context, input_modalities: &std::collections::HashSet<Modality>) -> Vec<AnthropicMessage> {
    let mut messages = Vec::new();

    for message in &context.messages {
        match message {
            Message::User { content, .. } => {
                messages.push(AnthropicMessage { role: "user", content: content_to_anthropic(content, input_modalities) });
            }
            Message::ToolResult { tool_call_id, content, is_error, .. } => {
                let text = render_text(content);
                messages.push(AnthropicMessage {
                    role: "user",
                    content: vec![AnthropicContent::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: sanitize_surrogates(&text),
                        is_error: *is_error,
                    }],
                });
            }
            Message::Assistant { api, native_message, content, .. } => {
                if *api == crate::model::Api::Anthropic
                    && let Some(native_content) = native_message.get("content").and_then(Value::as_array)
                    && let Ok(blocks) = serde_json::from_value::<Vec<Value>>(Value::Array(native_content.clone()))
                {
                    messages.push(AnthropicMessage { role: "assistant", content: native_passthrough(blocks) });
                    continue;
                }
                messages.push(AnthropicMessage { role: "assistant", content: translate_assistant_blocks(content) });
            }
            Message::Custom { .. } => {}
        }
    }

    messages
}

fn native_passthrough(blocks: Vec<Value>) -> Vec<AnthropicContent> {
    blocks
        .into_iter()
        .filter_map(|b| match b.get("type").and_then(Value::as_str) {
            Some("text") => Some(AnthropicContent::Text { text: b.get("text")?.as_str()?.to_string() }),
            Some("thinking") => Some(AnthropicContent::Thinking { thinking: b.get("thinking")?.as_str()?.to_string() }),
            Some("tool_use") => Some(AnthropicContent::ToolUse {
                id: b.get("id")?.as_str()?.to_string(),
                name: b.get("name")?.as_str()?.to_string(),
                input: b.get("input").cloned().unwrap_or(Value::Object(Default::default())),
            }),
            _ => None,
        })
        .collect()
}

fn content_to_anthropic(content: &Content, input_modalities: &std::collections::HashSet<Modality>) -> Vec<AnthropicContent> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(AnthropicContent::Text { text: sanitize_surrogates(text) }),
            ContentBlock::Image { data, mime_type } if input_modalities.contains(&Modality::Image) => {
                Some(AnthropicContent::Image {
                    source: ImageSource { kind: "base64", media_type: mime_type.clone(), data: data.clone() },
                })
            }
            _ => None,
        })
        .collect()
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

fn translate_assistant_blocks(content: &[AssistantBlock]) -> Vec<AnthropicContent> {
    content
        .iter()
        .map(|block| match block {
            AssistantBlock::Response { content } => AnthropicContent::Text { text: sanitize_surrogates(&render_text(content)) },
            AssistantBlock::Thinking { text } => AnthropicContent::Thinking { thinking: text.clone() },
            AssistantBlock::ToolCall { id, name, arguments } => AnthropicContent::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: serde_json::to_value(arguments).unwrap_or(Value::Object(Default::default())),
            },
        })
        .collect()
}

fn tool_to_anthropic(tool: &Tool) -> AnthropicTool {
    AnthropicTool { name: tool.name.clone(), description: tool.description.clone(), input_schema: tool.parameters.clone() }
}
