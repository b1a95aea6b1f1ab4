//! A small built-in catalog of well-known models, for callers that want to look
//! one up by id rather than constructing a [`Model`] by hand. This crate does not
//! fetch a remote catalog (see the doc comment on [`Model`]); entries here are a
//! convenience, not an authoritative source — callers with their own model list
//! should construct `Model` directly instead of relying on this lookup.

use std::collections::HashSet;

use crate::model::{Api, Cost, Model, Modality};

fn modalities(mods: &[Modality]) -> HashSet<Modality> {
    mods.iter().copied().collect()
}

fn capabilities(caps: &[&str]) -> HashSet<String> {
    caps.iter().map(|c| c.to_string()).collect()
}

fn entries() -> Vec<Model> {
    vec![
        Model {
            id: "gpt-4o".to_string(),
            name: "GPT-4o".to_string(),
            api: Api::OpenAi,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text, Modality::Image]),
            cost: Cost { input: 2.5, output: 10.0, cache_read: 1.25, cache_write: 0.0 },
            context_window: 128_000,
            max_tokens: 16_384,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "o3".to_string(),
            name: "o3".to_string(),
            api: Api::OpenAi,
            base_url: None,
            reasoning: true,
            input_modalities: modalities(&[Modality::Text, Modality::Image]),
            cost: Cost { input: 2.0, output: 8.0, cache_read: 0.5, cache_write: 0.0 },
            context_window: 200_000,
            max_tokens: 100_000,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "claude-sonnet-4-5".to_string(),
            name: "Claude Sonnet 4.5".to_string(),
            api: Api::Anthropic,
            base_url: None,
            reasoning: true,
            input_modalities: modalities(&[Modality::Text, Modality::Image, Modality::File]),
            cost: Cost { input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 },
            context_window: 200_000,
            max_tokens: 64_000,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "claude-haiku-4-5".to_string(),
            name: "Claude Haiku 4.5".to_string(),
            api: Api::Anthropic,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text, Modality::Image]),
            cost: Cost { input: 0.8, output: 4.0, cache_read: 0.08, cache_write: 1.0 },
            context_window: 200_000,
            max_tokens: 64_000,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "gemini-2.0-flash".to_string(),
            name: "Gemini 2.0 Flash".to_string(),
            api: Api::Google,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text, Modality::Image, Modality::File]),
            cost: Cost { input: 0.1, output: 0.4, cache_read: 0.025, cache_write: 0.0 },
            context_window: 1_048_576,
            max_tokens: 8_192,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "deepseek-chat".to_string(),
            name: "DeepSeek Chat".to_string(),
            api: Api::DeepSeek,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text]),
            cost: Cost { input: 0.27, output: 1.1, cache_read: 0.07, cache_write: 0.0 },
            context_window: 64_000,
            max_tokens: 8_192,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "deepseek-reasoner".to_string(),
            name: "DeepSeek Reasoner".to_string(),
            api: Api::DeepSeek,
            base_url: None,
            reasoning: true,
            input_modalities: modalities(&[Modality::Text]),
            cost: Cost { input: 0.55, output: 2.19, cache_read: 0.14, cache_write: 0.0 },
            context_window: 64_000,
            max_tokens: 8_192,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "llama-3.3-70b".to_string(),
            name: "Llama 3.3 70B".to_string(),
            api: Api::Cerebras,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text]),
            cost: Cost { input: 0.6, output: 0.6, cache_read: 0.0, cache_write: 0.0 },
            context_window: 128_000,
            max_tokens: 8_192,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "glm-4.6".to_string(),
            name: "GLM-4.6".to_string(),
            api: Api::Zai,
            base_url: None,
            reasoning: true,
            input_modalities: modalities(&[Modality::Text]),
            cost: Cost { input: 0.6, output: 2.2, cache_read: 0.11, cache_write: 0.0 },
            context_window: 200_000,
            max_tokens: 32_000,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
        Model {
            id: "kimi-k2".to_string(),
            name: "Kimi K2".to_string(),
            api: Api::Kimi,
            base_url: None,
            reasoning: false,
            input_modalities: modalities(&[Modality::Text]),
            cost: Cost { input: 0.6, output: 2.5, cache_read: 0.15, cache_write: 0.0 },
            context_window: 128_000,
            max_tokens: 32_000,
            headers: None,
            capabilities: capabilities(&["function_calling"]),
        },
    ]
}

/// Look up a built-in model by provider and id. Returns `None` for anything not
/// in the bundled list — construct a [`Model`] directly for anything else.
pub fn get_model(api: Api, model_id: &str) -> Option<Model> {
    entries().into_iter().find(|m| m.api == api && m.id == model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_known_model() {
        let model = get_model(Api::OpenAi, "gpt-4o").expect("gpt-4o should be in the catalog");
        assert_eq!(model.api, Api::OpenAi);
        assert!(model.context_window >= 128_000);
    }

    #[test]
    fn unknown_model_is_none() {
        assert!(get_model(Api::OpenAi, "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn wrong_provider_for_known_id_is_none() {
        assert!(get_model(Api::Anthropic, "gpt-4o").is_none());
    }
}
