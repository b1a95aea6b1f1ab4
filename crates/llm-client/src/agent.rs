//! The stateful, turn-by-turn conversation controller (component F): owns message
//! history, drives the provider adapter loop, executes tools, and fans events out
//! to subscribers. Everything else in this crate is a building block this module
//! assembles; see `SPEC_FULL.md` §4.F for the operation-by-operation contract.

mod budget;
mod events;
mod overflow;
mod queue;

pub use events::{AgentEvent, Subscriber};
pub use overflow::is_context_overflow;
pub use queue::{QueueMode, QueuedMessage};

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::error::{LlmError, Result};
use crate::message::{Content, Message, Tool, ToolError};
use crate::model::Model;
use crate::provider::{self, CancellationToken, CompletionOptions};
use crate::validator::validate_tool_arguments;

use self::budget::Budget;
use self::queue::MessageQueue;

/// One tool call ready for execution, handed to a [`ToolExecutor`].
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: HashMap<String, Value>,
    pub cancellation: CancellationToken,
    pub progress: ProgressEmitter,
}

/// What a tool call produced, translated into a `ToolResult` message.
pub struct ToolOutcome {
    pub content: Content,
    pub is_error: bool,
    pub error: Option<ToolError>,
    pub details: Option<Value>,
}

/// Forwards `tool_execution_update` events for a single in-flight tool call. A
/// tool opts into progress reporting simply by calling [`ProgressEmitter::emit`];
/// tools that never call it never produce update events. Backed by an unbounded
/// channel drained concurrently with the tool's future (see `execute_tool_calls`)
/// so progress events interleave with execution rather than queuing behind it.
#[derive(Clone)]
pub struct ProgressEmitter {
    tx: tokio::sync::mpsc::UnboundedSender<Value>,
}

impl ProgressEmitter {
    pub fn emit(&self, payload: Value) {
        let _ = self.tx.send(payload);
    }
}

/// A user-supplied tool implementation. One executor handles every tool name in
/// `Conversation`'s tool set; dispatch on `invocation.name` is the implementer's
/// responsibility, mirroring how the canonical `Tool` list is just names + schemas.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: ToolInvocation) -> ToolOutcome;
}

/// Rewrites a copy of the message history before it is sent to the adapter,
/// without touching the stored history (step 3 of the turn loop).
pub trait MessageTransformer: Send + Sync {
    fn transform(&self, messages: &[Message]) -> Vec<Message>;
}

impl<F: Fn(&[Message]) -> Vec<Message> + Send + Sync> MessageTransformer for F {
    fn transform(&self, messages: &[Message]) -> Vec<Message> {
        self(messages)
    }
}

struct State {
    messages: Vec<Message>,
    tools: Option<Vec<Tool>>,
    system_prompt: Option<String>,
    model: Model,
    options: CompletionOptions,
    pending_tool_calls: HashSet<String>,
    error: Option<String>,
    budget: Budget,
    queue: MessageQueue,
    queue_mode: QueueMode,
    tool_executor: Option<Arc<dyn ToolExecutor>>,
    message_transformer: Option<Arc<dyn MessageTransformer>>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber_id: u64,
    active_cancellation: Option<CancellationToken>,
}

/// A handle returned by [`Conversation::subscribe`], passed to
/// [`Conversation::unsubscribe`] to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The stateful turn-by-turn conversation controller.
///
/// Only one `prompt`/`continue` may run at a time; a concurrent call fails fast
/// with [`LlmError::Busy`] rather than queueing, matching the single-logical-loop
/// scheduling model. Setters are legal between prompts, not during one.
pub struct Conversation {
    state: Mutex<State>,
    busy: AtomicBool,
    idle: Notify,
}

impl Conversation {
    pub fn new(model: Model) -> Self {
        Self {
            state: Mutex::new(State {
                messages: Vec::new(),
                tools: None,
                system_prompt: None,
                model,
                options: CompletionOptions::default(),
                pending_tool_calls: HashSet::new(),
                error: None,
                budget: Budget::default(),
                queue: MessageQueue::default(),
                queue_mode: QueueMode::default(),
                tool_executor: None,
                message_transformer: None,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
                active_cancellation: None,
            }),
            busy: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    // ---- operations (4.F.1) -------------------------------------------------

    /// Append a user message and run the loop to completion, returning every
    /// message appended during this invocation.
    pub async fn prompt(&self, text: String, attachments: Content) -> Result<Vec<Message>> {
        self.acquire()?;
        let mut content = attachments;
        if !text.is_empty() {
            content.insert(0, crate::message::ContentBlock::Text { text });
        }
        let user_message = Message::User { id: new_id(), content, timestamp: Some(now_ms()) };
        {
            let mut state = self.state.lock().await;
            state.messages.push(user_message.clone());
        }
        let result = self.run_loop(vec![user_message]).await;
        self.release();
        result
    }

    /// Run the loop without adding a user message — used after an external
    /// recovery step such as trimming history following `ContextOverflow`.
    pub async fn continue_(&self) -> Result<Vec<Message>> {
        self.acquire()?;
        let result = self.run_loop(Vec::new()).await;
        self.release();
        result
    }

    /// Trip the cancellation token for the active prompt, if any. Idempotent.
    pub async fn abort(&self) {
        let state = self.state.lock().await;
        if let Some(token) = &state.active_cancellation {
            token.cancel();
        }
    }

    /// Resolve once `is_streaming()` is false.
    pub async fn wait_for_idle(&self) {
        loop {
            if !self.is_streaming() {
                return;
            }
            self.idle.notified().await;
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Abort if streaming, then clear messages, error, and pending tool calls.
    /// Usage counters are process-wide accounting and survive a reset.
    pub async fn reset(&self) {
        self.abort().await;
        self.wait_for_idle().await;
        let mut state = self.state.lock().await;
        state.messages.clear();
        state.error = None;
        state.pending_tool_calls.clear();
    }

    pub async fn append_message(&self, message: Message) {
        self.state.lock().await.messages.push(message);
    }

    pub async fn append_messages(&self, messages: Vec<Message>) {
        self.state.lock().await.messages.extend(messages);
    }

    pub async fn replace_messages(&self, messages: Vec<Message>) {
        self.state.lock().await.messages = messages;
    }

    pub async fn clear_messages(&self) {
        self.state.lock().await.messages.clear();
    }

    pub async fn remove_message(&self, id: &str) {
        self.state.lock().await.messages.retain(|m| m.id() != id);
    }

    pub async fn update_message(&self, id: &str, f: impl FnOnce(&mut Message)) {
        let mut state = self.state.lock().await;
        if let Some(message) = state.messages.iter_mut().find(|m| m.id() == id) {
            f(message);
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn queue_message(&self, item: QueuedMessage) {
        self.state.lock().await.queue.push(item);
    }

    pub async fn set_provider(&self, model: Model, options: CompletionOptions) {
        let mut state = self.state.lock().await;
        state.model = model;
        state.options = options;
    }

    pub async fn set_tools(&self, tools: Option<Vec<Tool>>) {
        self.state.lock().await.tools = tools;
    }

    pub async fn set_system_prompt(&self, prompt: Option<String>) {
        self.state.lock().await.system_prompt = prompt;
    }

    pub async fn set_cost_limit(&self, limit: Option<f64>) {
        self.state.lock().await.budget.cost_limit = limit;
    }

    pub async fn set_context_limit(&self, limit: Option<u64>) {
        self.state.lock().await.budget.context_limit = limit;
    }

    pub async fn set_queue_mode(&self, mode: QueueMode) {
        self.state.lock().await.queue_mode = mode;
    }

    pub async fn set_tool_executor(&self, executor: Arc<dyn ToolExecutor>) {
        self.state.lock().await.tool_executor = Some(executor);
    }

    pub async fn set_message_transformer(&self, transformer: Arc<dyn MessageTransformer>) {
        self.state.lock().await.message_transformer = Some(transformer);
    }

    pub async fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let mut state = self.state.lock().await;
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.push((id, subscriber));
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().await.subscribers.retain(|(sid, _)| *sid != id.0);
    }

    pub async fn total_cost(&self) -> f64 {
        self.state.lock().await.budget.total_cost
    }

    pub async fn last_input_tokens(&self) -> u64 {
        self.state.lock().await.budget.last_input_tokens
    }

    pub async fn pending_tool_calls(&self) -> HashSet<String> {
        self.state.lock().await.pending_tool_calls.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.lock().await.error.clone()
    }

    // ---- internals -----------------------------------------------------------

    fn acquire(&self) -> Result<()> {
        self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).map(|_| ()).map_err(|_| LlmError::Busy)
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    async fn notify(&self, event: AgentEvent) {
        let state = self.state.lock().await;
        for (_, subscriber) in &state.subscribers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                log::error!("agent event subscriber panicked; continuing");
            }
        }
    }

    /// The turn loop (4.F.2), run until there is no more work. `seed` is the list
    /// of messages appended before the loop started (the new user message, if
    /// any); it is included in the returned list.
    async fn run_loop(&self, seed: Vec<Message>) -> Result<Vec<Message>> {
        self.notify(AgentEvent::AgentStart).await;
        let mut appended = seed;

        loop {
            self.notify(AgentEvent::TurnStart).await;

            let outcome = self.run_turn().await;
            let (turn_appended, keep_going) = match outcome {
                Ok(v) => v,
                Err(err) => {
                    let mut state = self.state.lock().await;
                    state.error = Some(err.to_string());
                    drop(state);
                    self.notify(AgentEvent::TurnEnd).await;
                    return Err(err);
                }
            };
            appended.extend(turn_appended);

            self.notify(AgentEvent::TurnEnd).await;

            if !keep_going {
                self.notify(AgentEvent::AgentEnd { agent_messages: appended.clone() }).await;
                return Ok(appended);
            }
        }
    }

    /// One iteration of the turn loop. Returns the messages appended during this
    /// turn and whether the loop should continue.
    async fn run_turn(&self) -> Result<(Vec<Message>, bool)> {
        let mut turn_appended = Vec::new();

        let (model, context, options, context_window) = {
            let mut state = self.state.lock().await;
            state.budget.preflight()?;

            let transformed = match &state.message_transformer {
                Some(t) => t.transform(&state.messages),
                None => state.messages.clone(),
            };

            let cancellation = CancellationToken::new();
            state.active_cancellation = Some(cancellation.clone());

            let context = crate::message::Context { messages: transformed, system_prompt: state.system_prompt.clone(), tools: state.tools.clone() };
            let mut options = state.options.clone();
            options.cancellation = Some(cancellation);

            (state.model.clone(), context, options, state.model.context_window)
        };

        let id = new_id();
        self.notify(AgentEvent::MessageStart { message_type: "assistant", id: id.clone() }).await;

        let stream = provider::stream(&model, &context, &options, &id).await?;
        while let Some(event) = stream.recv().await {
            if let Some(call_id) = tool_call_end_id(&event) {
                self.state.lock().await.pending_tool_calls.insert(call_id);
            }
            self.notify(AgentEvent::MessageUpdate { id: id.clone(), event }).await;
        }

        let final_message = stream.result().await.clone();

        {
            let mut state = self.state.lock().await;
            state.active_cancellation = None;
            if let Message::Assistant { usage, .. } = &final_message {
                state.budget.total_cost += usage.cost.total;
                state.budget.last_input_tokens = usage.input;
            }
            state.messages.push(final_message.clone());
        }
        turn_appended.push(final_message.clone());
        self.notify(AgentEvent::MessageEnd { id: id.clone(), message: final_message.clone() }).await;

        if is_context_overflow(&final_message, Some(context_window)) {
            return Err(LlmError::ContextOverflow);
        }

        let has_pending_tools = final_message.is_tool_use();
        let queue_nonempty = !self.state.lock().await.queue.is_empty();
        {
            let state = self.state.lock().await;
            state.budget.postflight(has_pending_tools || queue_nonempty)?;
        }

        if has_pending_tools {
            self.execute_tool_calls(&final_message, &mut turn_appended).await?;
        }

        let drained = {
            let mut state = self.state.lock().await;
            let mode = state.queue_mode;
            state.queue.drain(mode)
        };
        let drained_any = !drained.is_empty();
        for item in drained {
            self.state.lock().await.messages.push(item.llm.clone());
            turn_appended.push(item.llm);
        }

        let keep_going = has_pending_tools || drained_any;
        Ok((turn_appended, keep_going))
    }

    /// Step 7: execute every tool call from `message`, in emission order,
    /// sequentially, appending a `ToolResult` message for each.
    async fn execute_tool_calls(&self, message: &Message, turn_appended: &mut Vec<Message>) -> Result<()> {
        let tool_calls: Vec<(String, String, HashMap<String, Value>)> =
            message.tool_calls().into_iter().map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone())).collect();

        let (tools, executor) = {
            let state = self.state.lock().await;
            (state.tools.clone(), state.tool_executor.clone())
        };

        for (call_id, name, arguments) in tool_calls {
            self.notify(AgentEvent::ToolExecutionStart { call_id: call_id.clone(), name: name.clone(), arguments: arguments.clone() })
                .await;

            let tool_def = tools.as_ref().and_then(|ts| ts.iter().find(|t| t.name == name));
            let validation = tool_def
                .ok_or_else(|| LlmError::SchemaValidation { tool: name.clone(), message: "unknown tool".to_string() })
                .and_then(|t| validate_tool_arguments(t, &serde_json::to_value(&arguments).unwrap_or_default()));

            let result_message = if let Err(err) = validation {
                self.synthesize_error_result(&call_id, &name, err.to_string()).await
            } else {
                match &executor {
                    None => self.synthesize_error_result(&call_id, &name, "no tool executor configured".to_string()).await,
                    Some(executor) => {
                        let cancellation = self.state.lock().await.active_cancellation.clone().unwrap_or_else(CancellationToken::new);
                        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
                        let progress = ProgressEmitter { tx: progress_tx };
                        let invocation =
                            ToolInvocation { call_id: call_id.clone(), name: name.clone(), arguments: arguments.clone(), cancellation, progress };

                        let execution = executor.execute(invocation);
                        tokio::pin!(execution);
                        let outcome = loop {
                            tokio::select! {
                                biased;
                                payload = progress_rx.recv() => {
                                    if let Some(payload) = payload {
                                        self.notify(AgentEvent::ToolExecutionUpdate { call_id: call_id.clone(), progress: payload }).await;
                                    }
                                }
                                outcome = &mut execution => break outcome,
                            }
                        };

                        Message::ToolResult {
                            id: new_id(),
                            tool_call_id: call_id.clone(),
                            tool_name: name.clone(),
                            content: outcome.content,
                            is_error: outcome.is_error,
                            error: outcome.error,
                            details: outcome.details,
                            timestamp: now_ms(),
                        }
                    }
                }
            };

            let is_error = matches!(&result_message, Message::ToolResult { is_error: true, .. });
            {
                let mut state = self.state.lock().await;
                state.messages.push(result_message.clone());
                state.pending_tool_calls.remove(&call_id);
            }
            turn_appended.push(result_message.clone());
            self.notify(AgentEvent::ToolExecutionEnd { call_id, result: result_message, is_error }).await;
        }

        Ok(())
    }

    async fn synthesize_error_result(&self, call_id: &str, name: &str, message: String) -> Message {
        Message::ToolResult {
            id: new_id(),
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            content: vec![crate::message::ContentBlock::Text { text: message.clone() }],
            is_error: true,
            error: Some(ToolError { message, name: Some(name.to_string()), stack: None }),
            details: None,
            timestamp: now_ms(),
        }
    }
}

fn tool_call_end_id(event: &crate::stream_event::AssistantEvent) -> Option<String> {
    match event {
        crate::stream_event::AssistantEvent::ToolCallEnd { id, .. } => Some(id.clone()),
        _ => None,
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

// `Usage` is re-exported for callers that want to read a terminal message's
// accounting directly; the conversation only aggregates `total_cost`.
pub use crate::message::Usage as TurnUsage;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Api, Cost};
    use std::sync::atomic::AtomicUsize;

    fn test_model() -> Model {
        Model {
            id: "test-model".into(),
            name: "test-model".into(),
            api: Api::Anthropic,
            base_url: None,
            reasoning: false,
            input_modalities: Default::default(),
            cost: Cost::default(),
            context_window: 200_000,
            max_tokens: 4096,
            headers: None,
            capabilities: Default::default(),
        }
    }

    #[tokio::test]
    async fn concurrent_prompt_fails_with_busy() {
        let conversation = Conversation::new(test_model());
        conversation.acquire().unwrap();
        assert!(matches!(conversation.acquire(), Err(LlmError::Busy)));
        conversation.release();
        assert!(conversation.acquire().is_ok());
    }

    #[tokio::test]
    async fn subscriber_panic_does_not_stop_delivery_to_others() {
        let conversation = Conversation::new(test_model());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        conversation.subscribe(Box::new(|_event: &AgentEvent| panic!("boom"))).await;
        conversation
            .subscribe(Box::new(move |_event: &AgentEvent| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        conversation.notify(AgentEvent::AgentStart).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let conversation = Conversation::new(test_model());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let id = conversation
            .subscribe(Box::new(move |_event: &AgentEvent| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        conversation.notify(AgentEvent::AgentStart).await;
        conversation.unsubscribe(id).await;
        conversation.notify(AgentEvent::AgentStart).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_clears_history_but_not_usage() {
        let conversation = Conversation::new(test_model());
        conversation.append_message(Message::User { id: "u1".into(), content: Vec::new(), timestamp: None }).await;
        conversation.state.lock().await.budget.total_cost = 1.5;

        conversation.reset().await;

        assert!(conversation.messages().await.is_empty());
        assert_eq!(conversation.total_cost().await, 1.5);
    }
}
