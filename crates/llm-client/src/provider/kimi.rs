use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Context, Message};
use crate::model::{Api, Model};
use crate::provider::openai_compatible::{CacheField, OpenAiCompatibleAdapter, Quirks, ReasoningEncoding};
use crate::provider::{CompletionOptions, ProviderAdapter};
use crate::stream_event::AssistantEventStream;

/// Moonshot's Kimi models use the Chat Completions dialect with `reasoning_content`
/// for thinking text and a top-level `cached_tokens` field for cache accounting.
pub(super) struct KimiAdapter {
    inner: OpenAiCompatibleAdapter,
}

impl KimiAdapter {
    pub(super) fn new() -> Self {
        Self {
            inner: OpenAiCompatibleAdapter::new(Quirks {
                api: Api::Kimi,
                default_base_url: "https://api.moonshot.ai/v1",
                reasoning_field: "reasoning_content",
                reasoning_encoding: ReasoningEncoding::Field,
                cache_field: CacheField::CachedTokens,
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for KimiAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        self.inner.complete(model, context, options, id).await
    }

    async fn stream(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<AssistantEventStream> {
        self.inner.stream(model, context, options, id).await
    }
}
