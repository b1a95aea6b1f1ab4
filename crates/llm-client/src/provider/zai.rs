use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Context, Message};
use crate::model::{Api, Model};
use crate::provider::openai_compatible::{CacheField, OpenAiCompatibleAdapter, Quirks, ReasoningEncoding};
use crate::provider::{CompletionOptions, ProviderAdapter};
use crate::stream_event::AssistantEventStream;

/// Z.AI's GLM models speak the same Chat Completions dialect, with `reasoning_content`
/// for thinking text and `prompt_tokens_details.cached_tokens` for cache accounting.
pub(super) struct ZaiAdapter {
    inner: OpenAiCompatibleAdapter,
}

impl ZaiAdapter {
    pub(super) fn new() -> Self {
        Self {
            inner: OpenAiCompatibleAdapter::new(Quirks {
                api: Api::Zai,
                default_base_url: "https://api.z.ai/api/paas/v4",
                reasoning_field: "reasoning_content",
                reasoning_encoding: ReasoningEncoding::Field,
                cache_field: CacheField::PromptTokensDetailsCachedTokens,
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ZaiAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        self.inner.complete(model, context, options, id).await
    }

    async fn stream(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<AssistantEventStream> {
        self.inner.stream(model, context, options, id).await
    }
}
