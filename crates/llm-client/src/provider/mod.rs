mod anthropic;
mod cerebras;
mod deepseek;
mod google;
mod http_client;
mod kimi;
mod openai;
mod openai_compatible;
mod zai;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::message::{Context, Message};
use crate::model::{Api, Model};
use crate::stream_event::AssistantEventStream;

/// A provider adapter: builds a wire request from a [`Context`], and translates the
/// provider's response (or event stream) back into the canonical message model.
///
/// Implemented once per wire protocol; dispatch is keyed off `Model::api` in
/// [`complete`] and [`stream`], mirroring how the teacher dispatches by
/// provider name rather than through a single monolithic client.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message>;

    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
        id: &str,
    ) -> Result<AssistantEventStream>;
}

/// Per-call knobs that are not part of the conversational context itself.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u64>,
    /// Overrides environment-variable credential lookup for this call.
    pub api_key: Option<secrecy::SecretString>,
    pub cancellation: Option<CancellationToken>,
}

/// A single-flag cooperative cancellation signal, shared by an adapter call and any
/// tool executions the agent loop spawns in response to it.
///
/// The agent only ever needs one boolean observed from async code, not the full
/// parent/child token tree `tokio-util::CancellationToken` provides, so this is a
/// small wrapper over a `tokio::sync::watch<bool>` rather than an extra dependency.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: std::sync::Arc<tokio::sync::watch::Sender<bool>>,
    rx: tokio::sync::watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::watch::channel(false);
        Self { tx: std::sync::Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up an API key in the environment for the given provider, returning `None`
/// when it is unset (callers treat that as [`LlmError::MissingCredential`]).
pub fn get_api_key_from_env(api: Api) -> Option<secrecy::SecretString> {
    std::env::var(api.env_var()).ok().map(Into::into)
}

/// Resolve the adapter for a model's `api` field.
pub fn adapter_for(api: Api) -> Box<dyn ProviderAdapter> {
    match api {
        Api::OpenAi => Box::new(openai::OpenAiAdapter::new()),
        Api::Anthropic => Box::new(anthropic::AnthropicAdapter::new()),
        Api::Google => Box::new(google::GoogleAdapter::new()),
        Api::DeepSeek => Box::new(deepseek::DeepSeekAdapter::new()),
        Api::Cerebras => Box::new(cerebras::CerebrasAdapter::new()),
        Api::Zai => Box::new(zai::ZaiAdapter::new()),
        Api::Kimi => Box::new(kimi::KimiAdapter::new()),
    }
}

/// `complete(model, context, options?, id?)` — the non-streaming public entry point.
pub async fn complete(model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
    adapter_for(model.api).complete(model, context, options, id).await
}

/// `stream(model, context, options?, id?)` — the streaming public entry point.
pub async fn stream(
    model: &Model,
    context: &Context,
    options: &CompletionOptions,
    id: &str,
) -> Result<AssistantEventStream> {
    adapter_for(model.api).stream(model, context, options, id).await
}

/// Resolve the API key to use for a call: the per-call override, else the
/// environment, else a typed error.
pub(crate) fn resolve_api_key(api: Api, options: &CompletionOptions) -> Result<secrecy::SecretString> {
    if let Some(key) = &options.api_key {
        return Ok(key.clone());
    }
    get_api_key_from_env(api).ok_or_else(|| LlmError::MissingCredential(api.as_str().to_string()))
}

/// Connect/read timeout shared by every adapter's `reqwest::Client`, matching the
/// teacher's pooled-connection builder.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
