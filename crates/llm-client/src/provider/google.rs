mod input;
mod output;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::HeaderMap;
use secrecy::ExposeSecret;

use self::input::build_request;
use self::output::{GenerateContentResponse, content_from, native_message_from, stop_reason_from, usage_from};

use crate::error::{LlmError, Result};
use crate::message::{AssistantBlock, Context, Message, StopReason};
use crate::model::Model;
use crate::provider::{CompletionOptions, ProviderAdapter, http_client, resolve_api_key};
use crate::stream_event::AssistantEvent;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(super) struct GoogleAdapter {
    client: Client,
}

impl GoogleAdapter {
    pub(super) fn new() -> Self {
        Self { client: http_client::build(HeaderMap::new()) }
    }

    fn base_url(&self, model: &Model) -> String {
        model.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let request = build_request(context, options, model.supports_function_calling(), &model.input_modalities)?;
        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        if body.len() > 1000 {
            log::debug!("Google request body is {} bytes", body.len());
        }

        let url = format!("{}/models/{}:generateContent?key={}", self.base_url(model), model.id, key.expose_secret());

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            log::error!("Google generateContent API error ({status}): {text}");
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let parsed: GenerateContentResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse Google generateContent payload: {e}");
            LlmError::Protocol("malformed Google generateContent payload".to_string())
        })?;

        let native_message = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let finish_reason = parsed.candidates.first().and_then(|c| c.finish_reason.clone());
        let usage = parsed.usage_metadata.as_ref().map(|u| usage_from(u, model.cost)).unwrap_or_default();
        let content = content_from(parsed.candidates.into_iter().next());
        let has_tool_calls = content.iter().any(|b| matches!(b, AssistantBlock::ToolCall { .. }));
        let stop_reason = stop_reason_from(finish_reason.as_deref(), has_tool_calls);

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
        let request = build_request(context, options, model.supports_function_calling(), &model.input_modalities)?;
        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url(model),
            model.id,
            key.expose_secret()
        );

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("Google streamGenerateContent API error ({status}): {text}");
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let (handle, stream) = crate::event_stream::channel();
        handle.push(AssistantEvent::Start);

        let model_id = model.id.clone();
        let cost = model.cost;
        let cancellation = options.cancellation.clone();
        let message_id = id.to_string();

        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            // Google resends each part's full text-so-far on every chunk rather than
            // incremental deltas, so we track how much of each position we have
            // already emitted and diff against it to still surface per-chunk deltas.
            let mut started_positions: Vec<bool> = Vec::new();
            let mut emitted_lengths: Vec<usize> = Vec::new();
            let mut last_content: Vec<AssistantBlock> = Vec::new();
            let mut last_usage = None;
            let mut last_finish_reason = None;

            loop {
                if let Some(token) = &cancellation
                    && token.is_cancelled()
                {
                    handle.push(AssistantEvent::Error { reason: StopReason::Aborted, message: "aborted".to_string() });
                    let native_message = native_message_from(&last_content);
                    handle.end(Message::Assistant {
                        id: message_id,
                        api: crate::model::Api::Google,
                        model: model_id,
                        timestamp: started,
                        duration: now_ms().saturating_sub(started),
                        stop_reason: StopReason::Aborted,
                        content: last_content,
                        usage: Default::default(),
                        error_message: Some("aborted".to_string()),
                        native_message,
                    });
                    return;
                }

                let Some(event) = events.next().await else { break };
                let Ok(event) = event else {
                    log::warn!("SSE parsing error in Google stream");
                    continue;
                };
                let Ok(chunk) = sonic_rs::from_str::<GenerateContentResponse>(&event.data) else {
                    log::warn!("failed to parse Google stream chunk");
                    continue;
                };

                last_usage = chunk.usage_metadata.or(last_usage);
                let Some(candidate) = chunk.candidates.into_iter().next() else { continue };
                last_finish_reason = candidate.finish_reason.clone().or(last_finish_reason);

                let content = content_from(Some(candidate));
                for (i, block) in content.iter().enumerate() {
                    while started_positions.len() <= i {
                        started_positions.push(false);
                        emitted_lengths.push(0);
                    }
                    if !started_positions[i] {
                        started_positions[i] = true;
                        match block {
                            AssistantBlock::Response { .. } => handle.push(AssistantEvent::TextStart { content_index: i }),
                            AssistantBlock::Thinking { .. } => handle.push(AssistantEvent::ThinkingStart { content_index: i }),
                            AssistantBlock::ToolCall { id, name, .. } => {
                                handle.push(AssistantEvent::ToolCallStart { content_index: i, id: id.clone(), name: name.clone() })
                            }
                        }
                    }

                    let text_so_far = match block {
                        AssistantBlock::Response { content } => content.iter().find_map(|b| match b {
                            crate::message::ContentBlock::Text { text } => Some(text.clone()),
                            _ => None,
                        }),
                        AssistantBlock::Thinking { text } => Some(text.clone()),
                        AssistantBlock::ToolCall { .. } => None,
                    };

                    if let Some(text) = text_so_far
                        && text.len() > emitted_lengths[i]
                    {
                        let delta = text[emitted_lengths[i]..].to_string();
                        emitted_lengths[i] = text.len();
                        match block {
                            AssistantBlock::Response { .. } => handle.push(AssistantEvent::TextDelta { content_index: i, delta }),
                            AssistantBlock::Thinking { .. } => handle.push(AssistantEvent::ThinkingDelta { content_index: i, delta }),
                            AssistantBlock::ToolCall { .. } => unreachable!(),
                        }
                    }

                    if let AssistantBlock::ToolCall { id, arguments, .. } = block {
                        handle.push(AssistantEvent::ToolCallDelta {
                            content_index: i,
                            id: id.clone(),
                            partial_arguments: serde_json::to_value(arguments).unwrap_or_default(),
                        });
                    }
                }
                last_content = content;
            }

            for (i, block) in last_content.iter().enumerate() {
                match block {
                    AssistantBlock::Response { .. } => handle.push(AssistantEvent::TextEnd { content_index: i }),
                    AssistantBlock::Thinking { .. } => handle.push(AssistantEvent::ThinkingEnd { content_index: i }),
                    AssistantBlock::ToolCall { id, .. } => handle.push(AssistantEvent::ToolCallEnd { content_index: i, id: id.clone() }),
                }
            }

            let has_tool_calls = last_content.iter().any(|b| matches!(b, AssistantBlock::ToolCall { .. }));
            let stop_reason = stop_reason_from(last_finish_reason.as_deref(), has_tool_calls);
            let native_message = native_message_from(&last_content);
            handle.push(AssistantEvent::Done { reason: stop_reason });

            let usage = last_usage.as_ref().map(|u| usage_from(u, cost)).unwrap_or_default();
            handle.end(Message::Assistant {
                id: message_id,
                api: crate::model::Api::Google,
                model: model_id,
                timestamp: started,
                duration: now_ms().saturating_sub(started),
                stop_reason,
                content: last_content,
                usage,
                error_message: None,
                native_message,
            });
        });

        Ok(stream)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
