mod input;
mod output;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use secrecy::ExposeSecret;

use self::input::build_request;
use self::output::{
    ResponsesResponse, ResponsesStreamEvent, ResponsesStreamProcessor, StepOutcome, content_from, native_message_from,
    stop_reason_from, usage_from,
};

use crate::error::{LlmError, Result};
use crate::message::{Message, StopReason};
use crate::model::Model;
use crate::provider::{CompletionOptions, ProviderAdapter, http_client, resolve_api_key};
use crate::stream_event::AssistantEvent;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub(super) struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    pub(super) fn new() -> Self {
        Self { client: http_client::build(HeaderMap::new()) }
    }

    fn base_url(&self, model: &Model) -> String {
        model.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, model: &Model, context: &crate::message::Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let request = build_request(
            &model.id,
            context,
            options,
            model.supports_function_calling(),
            &model.input_modalities,
            false,
        );

        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/responses", self.base_url(model)))
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            log::error!("OpenAI responses API error ({status}): {text}");
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let parsed: ResponsesResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse OpenAI responses payload: {e}");
            LlmError::Protocol("malformed OpenAI responses payload".to_string())
        })?;

        let native_message = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let status_str = parsed.status.clone();
        let incomplete = parsed.incomplete_details;
        let usage = parsed.usage.as_ref().map(|u| usage_from(u, model.cost)).unwrap_or_default();
        let content = content_from(parsed.output);
        let has_tool_calls = content.iter().any(|b| matches!(b, crate::message::AssistantBlock::ToolCall { .. }));
        let stop_reason = stop_reason_from(status_str.as_deref(), incomplete.as_ref(), has_tool_calls);

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
        context: &crate::message::Context,
        options: &CompletionOptions,
        id: &str,
    ) -> Result<crate::stream_event::AssistantEventStream> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let request = build_request(
            &model.id,
            context,
            options,
            model.supports_function_calling(),
            &model.input_modalities,
            true,
        );

        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/responses", self.base_url(model)))
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("OpenAI streaming responses API error ({status}): {text}");
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
            let mut processor = ResponsesStreamProcessor::new(model_id.clone());
            let mut final_usage = None;

            loop {
                if let Some(token) = &cancellation
                    && token.is_cancelled()
                {
                    handle.push(AssistantEvent::Error { reason: StopReason::Aborted, message: "aborted".to_string() });
                    let message = finalize(&message_id, model_id.clone(), started, StopReason::Aborted, processor, None, cost, None);
                    handle.end(message);
                    return;
                }

                let Some(event) = events.next().await else { break };
                let Ok(event) = event else {
                    log::warn!("SSE parsing error in OpenAI stream");
                    continue;
                };
                let Ok(parsed) = sonic_rs::from_str::<ResponsesStreamEvent>(&event.data) else {
                    log::warn!("failed to parse OpenAI stream event");
                    continue;
                };

                match processor.process(parsed) {
                    StepOutcome::Events(events) => {
                        for e in events {
                            handle.push(e);
                        }
                    }
                    StepOutcome::Done { usage } => {
                        final_usage = usage;
                        break;
                    }
                    StepOutcome::Error { message } => {
                        handle.push(AssistantEvent::Error { reason: StopReason::Error, message: message.clone() });
                        let assistant = finalize(&message_id, model_id.clone(), started, StopReason::Error, processor, final_usage, cost, Some(message));
                        handle.end(assistant);
                        return;
                    }
                }
            }

            let content = processor.into_assistant_response();
            let has_tool_calls = content.iter().any(|b| matches!(b, crate::message::AssistantBlock::ToolCall { .. }));
            let stop_reason = if has_tool_calls { StopReason::ToolUse } else { StopReason::Stop };
            let native_message = native_message_from(&content);
            handle.push(AssistantEvent::Done { reason: stop_reason });

            let usage = final_usage.as_ref().map(|u| usage_from(u, cost)).unwrap_or_default();
            handle.end(Message::Assistant {
                id: message_id,
                api: crate::model::Api::OpenAi,
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

#[allow(clippy::too_many_arguments)]
fn finalize(
    id: &str,
    model: String,
    started: u64,
    stop_reason: StopReason,
    processor: ResponsesStreamProcessor,
    usage: Option<output::ResponsesUsage>,
    cost: crate::model::Cost,
    error_message: Option<String>,
) -> Message {
    let content = processor.into_assistant_response();
    let native_message = native_message_from(&content);
    Message::Assistant {
        id: id.to_string(),
        api: crate::model::Api::OpenAi,
        model,
        timestamp: started,
        duration: now_ms().saturating_sub(started),
        stop_reason,
        content,
        usage: usage.as_ref().map(|u| usage_from(u, cost)).unwrap_or_default(),
        error_message,
        native_message,
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
