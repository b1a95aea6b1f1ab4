mod input;
mod output;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

use self::input::{build_request, is_oauth_token};
use self::output::{
    AnthropicStreamEvent, AnthropicStreamProcessor, MessagesResponse, StepOutcome, content_from, native_message_from,
    stop_reason_from, usage_from,
};

use crate::error::{LlmError, Result};
use crate::message::{Context, Message, StopReason};
use crate::model::Model;
use crate::provider::{CompletionOptions, ProviderAdapter, http_client, resolve_api_key};
use crate::stream_event::AssistantEvent;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const BETA_HEADER: &str = "fine-grained-tool-streaming-2025-05-14";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";

pub(super) struct AnthropicAdapter {
    client: Client,
}

impl AnthropicAdapter {
    pub(super) fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Self { client: http_client::build(headers) }
    }

    fn base_url(&self, model: &Model) -> String {
        model.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn beta_header(&self, is_oauth: bool) -> HeaderValue {
        let value = if is_oauth { format!("{BETA_HEADER},{OAUTH_BETA_HEADER}") } else { BETA_HEADER.to_string() };
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(BETA_HEADER))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        let started = now_ms();
        let key = resolve_api_key(model.api, options)?;
        let is_oauth = is_oauth_token(key.expose_secret());
        let request = build_request(
            &model.id,
            context,
            options,
            model.supports_function_calling(),
            &model.input_modalities,
            is_oauth,
            false,
        );

        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url(model)))
            .header("x-api-key", key.expose_secret())
            .header("anthropic-beta", self.beta_header(is_oauth))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            log::error!("Anthropic messages API error ({status}): {text}");
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let parsed: MessagesResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("failed to parse Anthropic messages payload: {e}");
            LlmError::Protocol("malformed Anthropic messages payload".to_string())
        })?;

        let native_message = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let usage = usage_from(parsed.usage, model.cost);
        let content = content_from(parsed.content);
        let has_tool_calls = content.iter().any(|b| matches!(b, crate::message::AssistantBlock::ToolCall { .. }));
        let stop_reason = stop_reason_from(parsed.stop_reason.as_deref(), has_tool_calls);

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
        let is_oauth = is_oauth_token(key.expose_secret());
        let request = build_request(
            &model.id,
            context,
            options,
            model.supports_function_calling(),
            &model.input_modalities,
            is_oauth,
            true,
        );

        let body = sonic_rs::to_vec(&request).map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url(model)))
            .header("x-api-key", key.expose_secret())
            .header("anthropic-beta", self.beta_header(is_oauth))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("Anthropic streaming messages API error ({status}): {text}");
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
            let mut processor = AnthropicStreamProcessor::new();

            loop {
                if let Some(token) = &cancellation
                    && token.is_cancelled()
                {
                    handle.push(AssistantEvent::Error { reason: StopReason::Aborted, message: "aborted".to_string() });
                    let content = processor.into_blocks();
                    let native_message = native_message_from(&content);
                    handle.end(Message::Assistant {
                        id: message_id,
                        api: crate::model::Api::Anthropic,
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
                    log::warn!("SSE parsing error in Anthropic stream");
                    continue;
                };
                let Ok(parsed) = sonic_rs::from_str::<AnthropicStreamEvent>(&event.data) else {
                    log::warn!("failed to parse Anthropic stream event");
                    continue;
                };

                match processor.process(parsed) {
                    StepOutcome::Events(events) => {
                        for e in events {
                            handle.push(e);
                        }
                    }
                    StepOutcome::Done { stop_reason, usage } => {
                        let content = processor.into_blocks();
                        let has_tool_calls = content.iter().any(|b| matches!(b, crate::message::AssistantBlock::ToolCall { .. }));
                        let stop_reason = stop_reason_from(stop_reason.as_deref(), has_tool_calls);
                        let native_message = native_message_from(&content);
                        handle.push(AssistantEvent::Done { reason: stop_reason });
                        handle.end(Message::Assistant {
                            id: message_id,
                            api: crate::model::Api::Anthropic,
                            model: model_id,
                            timestamp: started,
                            duration: now_ms().saturating_sub(started),
                            stop_reason,
                            content,
                            usage: usage_from(usage, cost),
                            error_message: None,
                            native_message,
                        });
                        return;
                    }
                    StepOutcome::Error { message } => {
                        let content = processor.into_blocks();
                        let native_message = native_message_from(&content);
                        handle.push(AssistantEvent::Error { reason: StopReason::Error, message: message.clone() });
                        handle.end(Message::Assistant {
                            id: message_id,
                            api: crate::model::Api::Anthropic,
                            model: model_id,
                            timestamp: started,
                            duration: now_ms().saturating_sub(started),
                            stop_reason: StopReason::Error,
                            content,
                            usage: Default::default(),
                            error_message: Some(message),
                            native_message,
                        });
                        return;
                    }
                }
            }

            // Stream ended without a message_delta/message_stop pair: surface what we have.
            let content = processor.into_blocks();
            let native_message = native_message_from(&content);
            handle.push(AssistantEvent::Error { reason: StopReason::Error, message: "stream ended unexpectedly".to_string() });
            handle.end(Message::Assistant {
                id: message_id,
                api: crate::model::Api::Anthropic,
                model: model_id,
                timestamp: started,
                duration: now_ms().saturating_sub(started),
                stop_reason: StopReason::Error,
                content,
                usage: Default::default(),
                error_message: Some("stream ended unexpectedly".to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A throwaway single-request HTTP responder, standing in for the teacher's
    /// axum-based mock server now that this crate has no axum dependency of its own.
    async fn respond_once(listener: TcpListener, status_line: &'static str, body: &'static str) -> (Vec<u8>, ) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let n = socket.read(&mut buf).await.unwrap();
        let request = buf[..n].to_vec();

        let response = format!("{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}", body.len());
        socket.write_all(response.as_bytes()).await.unwrap();
        (request,)
    }

    #[tokio::test]
    async fn non_streaming_request_sends_version_and_api_key_headers() {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let body = r#"{"id":"msg_1","content":[{"type":"text","text":"hi"}],"stop_reason":"end_turn","usage":{"input_tokens":10,"output_tokens":2}}"#;
        let server = tokio::spawn(respond_once(listener, "HTTP/1.1 200 OK", body));

        let adapter = AnthropicAdapter::new();
        let model = crate::model::Model {
            id: "claude-3".into(),
            name: "claude-3".into(),
            api: crate::model::Api::Anthropic,
            base_url: Some(format!("http://{addr}")),
            reasoning: false,
            input_modalities: Default::default(),
            cost: Default::default(),
            context_window: 200_000,
            max_tokens: 4096,
            headers: None,
            capabilities: Default::default(),
        };
        let context = Context::default();
        let options = CompletionOptions { api_key: Some("sk-test".into()), ..Default::default() };

        let result = adapter.complete(&model, &context, &options, "id-1").await.unwrap();
        let (request,) = server.await.unwrap();
        let request_text = String::from_utf8_lossy(&request);

        assert!(request_text.contains("x-api-key: sk-test"));
        assert!(request_text.contains("anthropic-beta: fine-grained-tool-streaming-2025-05-14"));
        assert!(matches!(result, Message::Assistant { stop_reason: StopReason::Stop, .. }));
    }
}
