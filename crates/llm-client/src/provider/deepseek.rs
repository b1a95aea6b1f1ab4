use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Context, Message};
use crate::model::{Api, Model};
use crate::provider::openai_compatible::{CacheField, OpenAiCompatibleAdapter, Quirks, ReasoningEncoding};
use crate::provider::{CompletionOptions, ProviderAdapter};
use crate::stream_event::AssistantEventStream;

/// DeepSeek speaks the Chat Completions dialect, surfacing its chain-of-thought
/// in `reasoning_content` and reporting cache hits as `prompt_cache_hit_tokens`.
pub(super) struct DeepSeekAdapter {
    inner: OpenAiCompatibleAdapter,
}

impl DeepSeekAdapter {
    pub(super) fn new() -> Self {
        Self {
            inner: OpenAiCompatibleAdapter::new(Quirks {
                api: Api::DeepSeek,
                default_base_url: "https://api.deepseek.com",
                reasoning_field: "reasoning_content",
                reasoning_encoding: ReasoningEncoding::Field,
                cache_field: CacheField::PromptCacheHitTokens,
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for DeepSeekAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        self.inner.complete(model, context, options, id).await
    }

    async fn stream(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<AssistantEventStream> {
        self.inner.stream(model, context, options, id).await
    }
}
