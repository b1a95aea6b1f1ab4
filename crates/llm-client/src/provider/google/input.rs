use serde::Serialize;
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::message::{AssistantBlock, Content, ContentBlock, Context, Message};
use crate::model::Modality;
use crate::provider::CompletionOptions;
use crate::sanitize::sanitize_surrogates;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateContentRequest {
    pub contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GoogleContent {
    pub role: &'static str,
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,
}

impl GooglePart {
    fn text(text: String) -> Self {
        Self { text: Some(text), thought: None, inline_data: None, function_call: None, function_response: None }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub(super) struct GoogleFunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GoogleFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct GoogleTool {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(super) struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub(super) fn build_request(
    context: &Context,
    options: &CompletionOptions,
    supports_function_calling: bool,
    input_modalities: &std::collections::HashSet<Modality>,
) -> Result<GenerateContentRequest> {
    let contents = build_contents(context, input_modalities);

    let tools = if supports_function_calling {
        match &context.tools {
            Some(tools) => {
                let function_declarations = tools
                    .iter()
                    .map(|t| {
                        Ok(FunctionDeclaration {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: strip_unsupported_schema_fields(t.parameters.clone())?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(vec![GoogleTool { function_declarations }])
            }
            None => None,
        }
    } else {
        None
    };

    Ok(GenerateContentRequest {
        contents,
        generation_config: Some(GenerationConfig { max_output_tokens: options.max_tokens, temperature: options.temperature }),
        tools,
        system_instruction: context
            .system_prompt
            .as_ref()
            .map(|p| GoogleContent { role: "user", parts: vec![GooglePart::text(sanitize_surrogates(p))] }),
    })
}

fn build_contents(context: &Context, input_modalities: &std::collections::HashSet<Modality>) -> Vec<GoogleContent> {
    let mut contents = Vec::new();

    for message in &context.messages {
        match message {
            Message::User { content, .. } => {
                contents.push(GoogleContent { role: "user", parts: content_to_parts(content, input_modalities) });
            }
            Message::ToolResult { tool_name, content, is_error, .. } => {
                let mut text = render_text(content);
                if *is_error {
                    text = format!("[TOOL ERROR] {text}");
                }
                contents.push(GoogleContent {
                    role: "user",
                    parts: vec![GooglePart {
                        text: None,
                        thought: None,
                        inline_data: None,
                        function_call: None,
                        function_response: Some(GoogleFunctionResponse {
                            name: tool_name.clone(),
                            response: serde_json::json!({ "result": sanitize_surrogates(&text) }),
                        }),
                    }],
                });
            }
            Message::Assistant { content, .. } => {
                contents.push(GoogleContent { role: "model", parts: translate_assistant_blocks(content) });
            }
            Message::Custom { .. } => {}
        }
    }

    contents
}

fn content_to_parts(content: &Content, input_modalities: &std::collections::HashSet<Modality>) -> Vec<GooglePart> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(GooglePart::text(sanitize_surrogates(text))),
            ContentBlock::Image { data, mime_type } if input_modalities.contains(&Modality::Image) => Some(GooglePart {
                text: None,
                thought: None,
                inline_data: Some(InlineData { mime_type: mime_type.clone(), data: data.clone() }),
                function_call: None,
                function_response: None,
            }),
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

fn translate_assistant_blocks(content: &[AssistantBlock]) -> Vec<GooglePart> {
    content
        .iter()
        .map(|block| match block {
            AssistantBlock::Response { content } => GooglePart::text(sanitize_surrogates(&render_text(content))),
            AssistantBlock::Thinking { text } => {
                let mut part = GooglePart::text(text.clone());
                part.thought = Some(true);
                part
            }
            AssistantBlock::ToolCall { name, arguments, .. } => GooglePart {
                text: None,
                thought: None,
                inline_data: None,
                function_call: Some(GoogleFunctionCall { name: name.clone(), args: serde_json::to_value(arguments).unwrap_or_default() }),
                function_response: None,
            },
        })
        .collect()
}

/// Google rejects several JSON Schema keywords outright. We recursively rewrite the
/// tool schema rather than pass it through: `const` becomes a single-value `enum`,
/// a homogeneous `anyOf` of `const`s collapses into one `enum`, and fields Google
/// does not understand (`additionalProperties`, `$schema`, `default`) are dropped.
/// `format` on string types is restricted to the handful Google recognizes. Google's
/// API also has no notion of `$ref`, so a local `$ref` is inlined one level deep
/// against the tool's own schema root; anything that doesn't resolve inside that
/// root, or whose resolved target itself carries another `$ref`, is rejected rather
/// than silently dropped.
pub(super) fn strip_unsupported_schema_fields(schema: Value) -> Result<Value> {
    let root = schema.clone();
    rewrite(schema, &root, true)
}

fn rewrite(schema: Value, root: &Value, allow_ref: bool) -> Result<Value> {
    match schema {
        Value::Object(mut map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if !allow_ref {
                    return Err(LlmError::InvalidRequest(format!("unsupported nested $ref in tool schema: {reference}")));
                }
                let pointer = reference.strip_prefix('#').ok_or_else(|| {
                    LlmError::InvalidRequest(format!("unsupported $ref target outside the tool schema root: {reference}"))
                })?;
                let resolved = root.pointer(pointer).cloned().ok_or_else(|| {
                    LlmError::InvalidRequest(format!("unresolved $ref in tool schema: {reference}"))
                })?;
                return rewrite(resolved, root, false);
            }

            if let Some(constant) = map.remove("const") {
                map.insert("enum".to_string(), Value::Array(vec![constant]));
            }

            if let Some(Value::Array(variants)) = map.get("anyOf")
                && variants.iter().all(|v| v.get("const").is_some())
            {
                let values: Vec<Value> = variants.iter().filter_map(|v| v.get("const").cloned()).collect();
                map.remove("anyOf");
                map.insert("enum".to_string(), Value::Array(values));
            }

            map.remove("additionalProperties");
            map.remove("$schema");
            map.remove("default");

            if map.get("type").and_then(Value::as_str) == Some("string")
                && let Some(format) = map.get("format").and_then(Value::as_str)
                && !matches!(format, "enum" | "date-time")
            {
                map.remove("format");
            }

            let rewritten: serde_json::Map<String, Value> =
                map.into_iter().map(|(k, v)| Ok((k, rewrite(v, root, true)?))).collect::<Result<_>>()?;

            Ok(Value::Object(rewritten))
        }
        Value::Array(items) => Ok(Value::Array(items.into_iter().map(|i| rewrite(i, root, true)).collect::<Result<Vec<_>>>()?)),
        other => Ok(other),
    }
}
