use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::message::{AssistantBlock, Content, ContentBlock, Context, Message, Tool};
use crate::model::Modality;
use crate::provider::CompletionOptions;
use crate::sanitize::sanitize_surrogates;

/// Request body for `POST /v1/responses`.
#[derive(Debug, Serialize)]
pub(super) struct ResponsesRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct Reasoning {
    pub summary: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum InputItem {
    Message {
        role: &'static str,
        content: Vec<InputContent>,
    },
    FunctionCall {
        #[serde(rename = "type")]
        kind: &'static str,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(rename = "type")]
        kind: &'static str,
        call_id: String,
        output: String,
    },
    Reasoning {
        #[serde(rename = "type")]
        kind: &'static str,
        summary: Vec<ReasoningSummary>,
    },
}

#[derive(Debug, Serialize)]
pub(super) struct ReasoningSummary {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(super) enum InputContent {
    #[serde(rename = "input_text")]
    Text { text: String },
    #[serde(rename = "input_image")]
    Image { image_url: String },
    #[serde(rename = "input_file")]
    File { filename: String, file_data: String },
}

#[derive(Debug, Serialize)]
pub(super) struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Build a Responses API request from canonical context.
///
/// The teacher's adapters always translate from whatever the caller hands them
/// rather than special-casing "it came from us last time" — we follow that here:
/// `nativeMessage` reuse for same-provider round-trips is left to the Anthropic
/// adapter, where cache control and thinking signatures make it load-bearing.
pub(super) fn build_request(
    model: &str,
    context: &Context,
    options: &CompletionOptions,
    supports_function_calling: bool,
    input_modalities: &HashSet<Modality>,
    stream: bool,
) -> ResponsesRequest {
    let mut input = Vec::new();

    for message in &context.messages {
        match message {
            Message::User { content, .. } => {
                input.push(InputItem::Message {
                    role: "user",
                    content: content_to_input(content, input_modalities),
                });
            }
            Message::ToolResult { tool_call_id, content, is_error, .. } => {
                let mut text = render_text(content);
                if *is_error {
                    text = format!("[TOOL ERROR] {text}");
                }
                input.push(InputItem::FunctionCallOutput {
                    kind: "function_call_output",
                    call_id: tool_call_id.clone(),
                    output: sanitize_surrogates(&text),
                });
            }
            Message::Assistant { content, .. } => translate_assistant_blocks(content, &mut input),
            Message::Custom { .. } => {}
        }
    }

    let tools = supports_function_calling.then(|| {
        context
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(tool_to_function).collect())
            .unwrap_or_default()
    });

    ResponsesRequest {
        model: model.to_string(),
        input,
        instructions: context.system_prompt.as_ref().map(|s| sanitize_surrogates(s)),
        tools,
        temperature: options.temperature,
        max_output_tokens: options.max_tokens,
        reasoning: None,
        stream,
    }
}

fn content_to_input(content: &Content, input_modalities: &HashSet<Modality>) -> Vec<InputContent> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(InputContent::Text { text: sanitize_surrogates(text) }),
            ContentBlock::Image { data, mime_type } if input_modalities.contains(&Modality::Image) => {
                Some(InputContent::Image { image_url: format!("data:{mime_type};base64,{data}") })
            }
            ContentBlock::File { data, mime_type, filename } if input_modalities.contains(&Modality::File) => {
                Some(InputContent::File {
                    filename: filename.clone(),
                    file_data: format!("data:{mime_type};base64,{data}"),
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

fn translate_assistant_blocks(content: &[AssistantBlock], input: &mut Vec<InputItem>) {
    let mut text_parts = Vec::new();
    for block in content {
        match block {
            AssistantBlock::Response { content } => text_parts.push(render_text(content)),
            AssistantBlock::Thinking { text } => input.push(InputItem::Reasoning {
                kind: "reasoning",
                summary: vec![ReasoningSummary { kind: "summary_text", text: sanitize_surrogates(text) }],
            }),
            AssistantBlock::ToolCall { id, name, arguments } => {
                input.push(InputItem::FunctionCall {
                    kind: "function_call",
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string()),
                });
            }
        }
    }
    if !text_parts.is_empty() {
        input.push(InputItem::Message {
            role: "assistant",
            content: vec![InputContent::Text { text: sanitize_surrogates(&text_parts.join("\n")) }],
        });
    }
}

fn tool_to_function(tool: &Tool) -> FunctionTool {
    FunctionTool {
        kind: "function",
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}
