//! `AgentEvent`, the tagged variant delivered to a [`super::Conversation`]'s
//! subscribers over the lifetime of one `prompt()`/`continue()` invocation.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::Message;
use crate::stream_event::AssistantEvent;

/// One event in the lifecycle of a conversation turn, delivered synchronously and
/// in-order to every subscriber.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    TurnStart,

    /// An assistant message began streaming.
    MessageStart { message_type: &'static str, id: String },
    /// An incremental streaming event for the in-flight assistant message.
    MessageUpdate { id: String, event: AssistantEvent },
    /// The message (of any role) reached its final form and was appended to history.
    MessageEnd { id: String, message: Message },

    ToolExecutionStart { call_id: String, name: String, arguments: HashMap<String, Value> },
    ToolExecutionUpdate { call_id: String, progress: Value },
    ToolExecutionEnd { call_id: String, result: Message, is_error: bool },

    TurnEnd,
    /// The loop has nothing left to do; carries every message appended during
    /// this `prompt`/`continue` invocation.
    AgentEnd { agent_messages: Vec<Message> },
}

/// A subscriber callback. Errors or panics inside it are caught and logged —
/// see [`super::Conversation::notify`] — never propagated to the loop.
pub type Subscriber = Box<dyn Fn(&AgentEvent) + Send + Sync>;
