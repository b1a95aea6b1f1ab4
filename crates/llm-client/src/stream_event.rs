use serde::{Deserialize, Serialize};

use crate::message::{Message, StopReason};

/// One event emitted by a provider adapter's streaming path.
///
/// Every delta and every `*_end` variant carries the `content_index` of the
/// assistant content block it belongs to; indices are assigned in block-creation
/// order and never reused within one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    Start,

    TextStart { content_index: usize },
    TextDelta { content_index: usize, delta: String },
    TextEnd { content_index: usize },

    ThinkingStart { content_index: usize },
    ThinkingDelta { content_index: usize, delta: String },
    ThinkingEnd { content_index: usize },

    ToolCallStart { content_index: usize, id: String, name: String },
    ToolCallDelta {
        content_index: usize,
        id: String,
        /// Best-effort parse of the arguments accumulated so far.
        partial_arguments: serde_json::Value,
    },
    ToolCallEnd { content_index: usize, id: String },

    /// Terminal: the stream completed normally (possibly with `stopReason: toolUse`).
    Done { reason: StopReason },
    /// Terminal: the stream failed or was cancelled.
    Error { reason: StopReason, message: String },
}

impl AssistantEvent {
    pub fn content_index(&self) -> Option<usize> {
        match self {
            AssistantEvent::Start | AssistantEvent::Done { .. } | AssistantEvent::Error { .. } => None,
            AssistantEvent::TextStart { content_index }
            | AssistantEvent::TextDelta { content_index, .. }
            | AssistantEvent::TextEnd { content_index }
            | AssistantEvent::ThinkingStart { content_index }
            | AssistantEvent::ThinkingDelta { content_index, .. }
            | AssistantEvent::ThinkingEnd { content_index }
            | AssistantEvent::ToolCallStart { content_index, .. }
            | AssistantEvent::ToolCallDelta { content_index, .. }
            | AssistantEvent::ToolCallEnd { content_index, .. } => Some(*content_index),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssistantEvent::Done { .. } | AssistantEvent::Error { .. })
    }
}

/// The event/result pair produced by an adapter's `stream` entry point.
pub type AssistantEventStream = crate::event_stream::EventStream<AssistantEvent, Message>;
pub type AssistantEventStreamHandle = crate::event_stream::EventStreamHandle<AssistantEvent, Message>;
