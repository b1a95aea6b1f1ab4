use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Context, Message};
use crate::model::{Api, Model};
use crate::provider::openai_compatible::{CacheField, OpenAiCompatibleAdapter, Quirks, ReasoningEncoding};
use crate::provider::{CompletionOptions, ProviderAdapter};
use crate::stream_event::AssistantEventStream;

/// Cerebras hosts GLM and Llama models behind a Chat Completions endpoint. Reasoning
/// text arrives in `reasoning_content`; cache hits nest under `prompt_tokens_details`.
pub(super) struct CerebrasAdapter {
    inner: OpenAiCompatibleAdapter,
}

impl CerebrasAdapter {
    pub(super) fn new() -> Self {
        Self {
            inner: OpenAiCompatibleAdapter::new(Quirks {
                api: Api::Cerebras,
                default_base_url: "https://api.cerebras.ai/v1",
                reasoning_field: "reasoning_content",
                reasoning_encoding: ReasoningEncoding::ContentTag,
                cache_field: CacheField::PromptTokensDetailsCachedTokens,
            }),
        }
    }
}

#[async_trait]
impl ProviderAdapter for CerebrasAdapter {
    async fn complete(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<Message> {
        self.inner.complete(model, context, options, id).await
    }

    async fn stream(&self, model: &Model, context: &Context, options: &CompletionOptions, id: &str) -> Result<AssistantEventStream> {
        self.inner.stream(model, context, options, id).await
    }
}
