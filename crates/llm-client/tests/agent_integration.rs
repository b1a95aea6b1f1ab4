//! End-to-end coverage of the conversation loop (component F) against a raw TCP
//! mock HTTP server standing in for a provider, following the same single-request
//! responder pattern `provider::anthropic`'s unit tests use, extended to serve a
//! sequence of SSE responses and to drip-feed bytes for the abort scenario.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llm_client::agent::{AgentEvent, Conversation, ToolExecutor, ToolInvocation, ToolOutcome};
use llm_client::{Api, CompletionOptions, ContentBlock, Cost, Model, Tool};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

mod mock {
    use super::*;

    pub async fn bind() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn sse_frame(events: &[Value]) -> String {
        let mut out = String::new();
        for event in events {
            out.push_str("data: ");
            out.push_str(&event.to_string());
            out.push_str("\n\n");
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    /// Accept one connection per body, writing each as a complete SSE response in
    /// a single `write_all`. Used for turns whose whole response is known upfront.
    pub async fn serve_sequence(listener: TcpListener, turns: Vec<Vec<Value>>) {
        for events in turns {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16384];
            let _ = socket.read(&mut buf).await.unwrap();

            let body = sse_frame(&events);
            let response =
                format!("HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}", body.len(), body);
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    }

    /// Same as [`serve_sequence`], but also returns each request's raw bytes so a
    /// test can inspect exactly what an adapter sent on a later turn.
    pub async fn serve_sequence_capturing(listener: TcpListener, turns: Vec<Vec<Value>>) -> Vec<Vec<u8>> {
        let mut captured = Vec::new();
        for events in turns {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16384];
            let n = socket.read(&mut buf).await.unwrap();
            captured.push(buf[..n].to_vec());

            let body = sse_frame(&events);
            let response =
                format!("HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}", body.len(), body);
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
        captured
    }

    /// Accept one connection and write each event as its own TCP write with a
    /// delay in between, so a reader observes them arriving over time rather than
    /// all at once — used to give the abort scenario a window to land mid-stream.
    pub async fn drip_feed(listener: TcpListener, events: Vec<Value>, gap: Duration) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16384];
        let _ = socket.read(&mut buf).await.unwrap();

        let body = sse_frame(&events);
        let header = format!("HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\ncontent-length: {}\r\n\r\n", body.len());
        socket.write_all(header.as_bytes()).await.unwrap();

        for event in &events {
            let frame = format!("data: {}\n\n", event);
            if socket.write_all(frame.as_bytes()).await.is_err() {
                return;
            }
            tokio::time::sleep(gap).await;
        }
        let _ = socket.write_all(b"data: [DONE]\n\n").await;
        let _ = socket.shutdown().await;
    }
}

fn test_model(api: Api, addr: SocketAddr, context_window: u64) -> Model {
    Model {
        id: "test-model".to_string(),
        name: "test-model".to_string(),
        api,
        base_url: Some(format!("http://{addr}")),
        reasoning: false,
        input_modalities: Default::default(),
        cost: Cost { input: 1.0, output: 1.0, cache_read: 0.0, cache_write: 0.0 },
        context_window,
        max_tokens: 4096,
        headers: None,
        capabilities: ["function_calling".to_string()].into_iter().collect(),
    }
}

fn options_with_key() -> CompletionOptions {
    CompletionOptions { api_key: Some("test-key".into()), ..Default::default() }
}

struct WeatherTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolExecutor for WeatherTool {
    async fn execute(&self, invocation: ToolInvocation) -> ToolOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        invocation.progress.emit(json!({"stage": "looking up"}));
        let city = invocation.arguments.get("city").and_then(Value::as_str).unwrap_or_default().to_string();
        ToolOutcome {
            content: vec![ContentBlock::Text { text: format!("{city}: sunny") }],
            is_error: false,
            error: None,
            details: None,
        }
    }
}

fn weather_tool() -> Tool {
    Tool {
        name: "get_weather".to_string(),
        description: "Get the current weather for a city".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"],
        }),
    }
}

/// Scenario: a single turn where the model calls a tool, the executor runs, and
/// the model is re-invoked with the tool result to produce a final answer.
/// Also exercises streaming partial tool-call arguments along the way.
#[tokio::test]
async fn single_turn_tool_call_then_final_response() {
    let (listener, addr) = mock::bind().await;

    let turn1 = vec![
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":""}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"paris\"}"}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":50,"completion_tokens":10,"prompt_cache_hit_tokens":0}}),
    ];
    let turn2 = vec![
        json!({"choices":[{"index":0,"delta":{"content":"The weather in Paris is sunny."},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":80,"completion_tokens":8,"prompt_cache_hit_tokens":0}}),
    ];
    tokio::spawn(mock::serve_sequence(listener, vec![turn1, turn2]));

    let conversation = Conversation::new(test_model(Api::DeepSeek, addr, 200_000));
    conversation.set_provider(test_model(Api::DeepSeek, addr, 200_000), options_with_key()).await;
    conversation.set_tools(Some(vec![weather_tool()])).await;

    let calls = Arc::new(AtomicUsize::new(0));
    conversation.set_tool_executor(Arc::new(WeatherTool { calls: calls.clone() })).await;

    let tool_call_deltas = Arc::new(AtomicUsize::new(0));
    let tool_call_deltas_clone = tool_call_deltas.clone();
    conversation
        .subscribe(Box::new(move |event: &AgentEvent| {
            if let AgentEvent::MessageUpdate { event, .. } = event
                && matches!(event, llm_client::AssistantEvent::ToolCallDelta { .. })
            {
                tool_call_deltas_clone.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .await;

    let appended = conversation.prompt("What's the weather in Paris?".to_string(), Vec::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tool_call_deltas.load(Ordering::SeqCst) >= 2, "expected streamed partial tool-call arguments");
    assert_eq!(appended.len(), 4);
    assert!(matches!(&appended[0], llm_client::Message::User { .. }));
    assert!(appended[1].is_tool_use());
    assert!(matches!(&appended[2], llm_client::Message::ToolResult { is_error: false, .. }));
    assert!(matches!(&appended[3], llm_client::Message::Assistant { stop_reason: llm_client::StopReason::Stop, .. }));
}

/// Scenario: the caller aborts mid-stream; the adapter must surface `aborted`
/// rather than hang or silently finish.
#[tokio::test]
async fn abort_mid_stream_marks_message_aborted() {
    let (listener, addr) = mock::bind().await;

    let events = vec![
        json!({"choices":[{"index":0,"delta":{"content":"Once"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"content":" upon"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"content":" a"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"content":" time"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{"content":" there was a very long story"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}),
    ];
    tokio::spawn(mock::drip_feed(listener, events, Duration::from_millis(30)));

    let conversation = Arc::new(Conversation::new(test_model(Api::DeepSeek, addr, 200_000)));
    conversation.set_provider(test_model(Api::DeepSeek, addr, 200_000), options_with_key()).await;

    let run = {
        let conversation = conversation.clone();
        tokio::spawn(async move { conversation.prompt("tell me a story".to_string(), Vec::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(40)).await;
    conversation.abort().await;

    let appended = run.await.unwrap().unwrap();
    let last = appended.last().unwrap();
    assert!(matches!(last, llm_client::Message::Assistant { stop_reason: llm_client::StopReason::Aborted, .. }));
}

/// Scenario: usage on a `stop`-terminated turn indicates the prompt silently
/// exceeded the model's context window; the turn loop must surface
/// `ContextOverflow` rather than treat it as a normal completion.
#[tokio::test]
async fn context_overflow_detected_via_usage_fallback() {
    let (listener, addr) = mock::bind().await;

    let turn = vec![
        json!({"choices":[{"index":0,"delta":{"content":"partial"},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":9000,"completion_tokens":5}}),
    ];
    tokio::spawn(mock::serve_sequence(listener, vec![turn]));

    let conversation = Conversation::new(test_model(Api::DeepSeek, addr, 1_000));
    conversation.set_provider(test_model(Api::DeepSeek, addr, 1_000), options_with_key()).await;

    let err = conversation.prompt("hello".to_string(), Vec::new()).await.unwrap_err();
    assert!(matches!(err, llm_client::LlmError::ContextOverflow));
    assert_eq!(conversation.error().await.as_deref(), Some(err.to_string()).as_deref());
}

/// Scenario: a cost limit already exceeded before any call is made is fatal at
/// pre-flight, with no network call attempted.
#[tokio::test]
async fn cost_limit_blocks_at_preflight_before_any_call() {
    let conversation = Conversation::new(test_model(Api::DeepSeek, "127.0.0.1:1".parse().unwrap(), 200_000));
    conversation.set_cost_limit(Some(0.0)).await;

    let err = conversation.prompt("hi".to_string(), Vec::new()).await.unwrap_err();
    assert!(matches!(err, llm_client::LlmError::CostLimitExceeded { .. }));
}

/// Scenario: a cost limit crossed by the turn that just completed is only fatal
/// when there is more work left to do (here, a pending tool call); a plain final
/// answer is never retroactively truncated by the same overrun.
#[tokio::test]
async fn cost_limit_blocks_at_postflight_when_tool_call_pending() {
    let (listener, addr) = mock::bind().await;

    let turn = vec![
        json!({"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"nowhere\"}"}}]},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":1_000_000,"completion_tokens":10}}),
    ];
    tokio::spawn(mock::serve_sequence(listener, vec![turn]));

    let conversation = Conversation::new(test_model(Api::DeepSeek, addr, 200_000));
    conversation.set_provider(test_model(Api::DeepSeek, addr, 200_000), options_with_key()).await;
    conversation.set_tools(Some(vec![weather_tool()])).await;
    conversation.set_cost_limit(Some(0.01)).await;

    let err = conversation.prompt("weather?".to_string(), Vec::new()).await.unwrap_err();
    assert!(matches!(err, llm_client::LlmError::CostLimitExceeded { .. }));
    // the turn's own assistant message was still appended before the budget check fired
    assert!(conversation.messages().await.iter().any(|m| m.is_tool_use()));
}

/// Scenario: switching models/providers mid-conversation (e.g. after a
/// `ContextOverflow` recovery, or a deliberate hand-off) keeps history coherent.
#[tokio::test]
async fn cross_provider_handoff_preserves_history() {
    let (listener_a, addr_a) = mock::bind().await;
    let (listener_b, addr_b) = mock::bind().await;

    let turn_a = vec![
        json!({"choices":[{"index":0,"delta":{"content":"Hi from provider A."},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}),
    ];
    let turn_b = vec![
        json!({"choices":[{"index":0,"delta":{"content":"Hi from provider B."},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}),
    ];
    tokio::spawn(mock::serve_sequence(listener_a, vec![turn_a]));
    tokio::spawn(mock::serve_sequence(listener_b, vec![turn_b]));

    let conversation = Conversation::new(test_model(Api::DeepSeek, addr_a, 200_000));
    conversation.set_provider(test_model(Api::DeepSeek, addr_a, 200_000), options_with_key()).await;
    conversation.prompt("hello A".to_string(), Vec::new()).await.unwrap();

    conversation.set_provider(test_model(Api::Kimi, addr_b, 200_000), options_with_key()).await;
    conversation.prompt("hello B".to_string(), Vec::new()).await.unwrap();

    let messages = conversation.messages().await;
    assert_eq!(messages.len(), 4); // user A, assistant A, user B, assistant B
    let apis: Vec<Api> = messages
        .iter()
        .filter_map(|m| match m {
            llm_client::Message::Assistant { api, .. } => Some(*api),
            _ => None,
        })
        .collect();
    assert_eq!(apis, vec![Api::DeepSeek, Api::Kimi]);
}

fn anthropic_turn(thinking: &str, text: &str, stop_reason: &str) -> Vec<Value> {
    vec![
        json!({"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":10,"output_tokens":0}}}),
        json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking"}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":thinking}}),
        json!({"type":"content_block_stop","index":0}),
        json!({"type":"content_block_start","index":1,"content_block":{"type":"text"}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":text}}),
        json!({"type":"content_block_stop","index":1}),
        json!({"type":"message_delta","delta":{"stop_reason":stop_reason},"usage":{"input_tokens":10,"output_tokens":5}}),
        json!({"type":"message_stop"}),
    ]
}

/// Scenario: a streamed Anthropic turn must populate `nativeMessage` (previously
/// hard-coded to `Null` on every streaming completion path), and a later turn sent
/// back to the same provider must reuse it so the assistant message round-trips
/// through `anthropic/input.rs`'s same-provider passthrough rather than being
/// rebuilt from the canonical content blocks every time.
#[tokio::test]
async fn same_provider_resend_reuses_native_message() {
    let (listener, addr) = mock::bind().await;

    let turn1 = anthropic_turn("Let me think this through.", "Hello!", "end_turn");
    let turn2 = anthropic_turn("Still thinking.", "Goodbye!", "end_turn");
    let captured = tokio::spawn(mock::serve_sequence_capturing(listener, vec![turn1, turn2]));

    let conversation = Conversation::new(test_model(Api::Anthropic, addr, 200_000));
    conversation.set_provider(test_model(Api::Anthropic, addr, 200_000), options_with_key()).await;

    conversation.prompt("hi".to_string(), Vec::new()).await.unwrap();

    let messages_after_first = conversation.messages().await;
    let native_message = messages_after_first
        .iter()
        .find_map(|m| match m {
            llm_client::Message::Assistant { native_message, .. } => Some(native_message.clone()),
            _ => None,
        })
        .unwrap();
    assert_ne!(native_message, Value::Null, "streamed Anthropic completion must populate nativeMessage");
    let native_content = native_message.get("content").and_then(Value::as_array).unwrap();
    assert!(native_content.iter().any(|b| b.get("type").and_then(Value::as_str) == Some("thinking")));
    assert!(native_content.iter().any(|b| b.get("type").and_then(Value::as_str) == Some("text")));

    conversation.prompt("again".to_string(), Vec::new()).await.unwrap();

    let requests = captured.await.unwrap();
    let second_request = String::from_utf8_lossy(&requests[1]);
    assert!(second_request.contains("\"type\":\"thinking\""), "resend must carry the stored native thinking block");
    assert!(second_request.contains("Let me think this through."), "resend must reuse the exact native content, not a fresh translation");
}

/// Scenario: an assistant `Thinking` block produced by one provider, handed off to
/// a DeepSeek-compatible provider, must be re-encoded under that provider's own
/// `reasoning_content` field rather than text-wrapped with `<thinking>` tags.
#[tokio::test]
async fn cross_provider_handoff_encodes_thinking_in_native_reasoning_field() {
    let (listener_a, addr_a) = mock::bind().await;
    let (listener_b, addr_b) = mock::bind().await;

    let turn_a = anthropic_turn("Considering the weather patterns.", "It looks sunny.", "end_turn");
    tokio::spawn(mock::serve_sequence(listener_a, vec![turn_a]));

    let turn_b = vec![
        json!({"choices":[{"index":0,"delta":{"content":"Indeed, sunny."},"finish_reason":null}]}),
        json!({"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5}}),
    ];
    let captured_b = tokio::spawn(mock::serve_sequence_capturing(listener_b, vec![turn_b]));

    let conversation = Conversation::new(test_model(Api::Anthropic, addr_a, 200_000));
    conversation.set_provider(test_model(Api::Anthropic, addr_a, 200_000), options_with_key()).await;
    conversation.prompt("what's the weather?".to_string(), Vec::new()).await.unwrap();

    conversation.set_provider(test_model(Api::DeepSeek, addr_b, 200_000), options_with_key()).await;
    conversation.prompt("are you sure?".to_string(), Vec::new()).await.unwrap();

    let requests = captured_b.await.unwrap();
    let request_text = String::from_utf8_lossy(&requests[0]);
    assert!(
        request_text.contains("\"reasoning_content\":\"Considering the weather patterns.\""),
        "cross-provider handoff must carry the Thinking block under DeepSeek's native reasoning field"
    );
    assert!(!request_text.contains("<thinking>"), "DeepSeek handoff must not fall back to text-wrapping the reasoning");
}
