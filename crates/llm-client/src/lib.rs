//! A provider-agnostic LLM client: canonical message/event types, one adapter per
//! wire protocol, a JSON-Schema tool-argument validator, and a stateful
//! [`agent::Conversation`] that drives the turn-by-turn agentic loop over them.
//!
//! See `SPEC_FULL.md` for the full component-by-component contract.

pub mod agent;
mod catalog;
mod error;
mod event_stream;
mod message;
mod model;
mod partial_json;
pub mod provider;
mod sanitize;
mod stream_event;
mod validator;

pub use catalog::get_model;
pub use error::{LlmError, Result};
pub use event_stream::{EventStream, EventStreamHandle};
pub use message::{
    AssistantBlock, AssistantResponse, Content, ContentBlock, Context, Message, StopReason, Tool, ToolError, Usage,
    UsageCost,
};
pub use model::{Api, Cost, Modality, Model};
pub use provider::{
    CancellationToken, CompletionOptions, ProviderAdapter, complete, get_api_key_from_env, stream,
};
pub use stream_event::{AssistantEvent, AssistantEventStream, AssistantEventStreamHandle};
pub use validator::validate_tool_arguments;
