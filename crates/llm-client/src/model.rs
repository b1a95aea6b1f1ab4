use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Which wire protocol a model speaks. Adapter dispatch keys off this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    Cerebras,
    Zai,
    Kimi,
}

impl Api {
    /// The environment variable consulted by `get_api_key_from_env` for this provider.
    pub fn env_var(self) -> &'static str {
        match self {
            Api::OpenAi => "OPENAI_API_KEY",
            Api::Anthropic => "ANTHROPIC_API_KEY",
            Api::Google => "GEMINI_API_KEY",
            Api::DeepSeek => "DEEPSEEK_API_KEY",
            Api::Cerebras => "CEREBRAS_API_KEY",
            Api::Zai => "ZAI_API_KEY",
            Api::Kimi => "KIMI_API_KEY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Api::OpenAi => "openai",
            Api::Anthropic => "anthropic",
            Api::Google => "google",
            Api::DeepSeek => "deepseek",
            Api::Cerebras => "cerebras",
            Api::Zai => "zai",
            Api::Kimi => "kimi",
        }
    }
}

/// A content modality a model accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    File,
}

/// Per-million-token pricing, used to derive `Usage::cost`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// A model catalog entry. Callers construct these directly or look them up with
/// [`crate::provider::get_model`]; this crate does not load a remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub api: Api,
    pub base_url: Option<String>,
    pub reasoning: bool,
    pub input_modalities: HashSet<Modality>,
    pub cost: Cost,
    pub context_window: u64,
    pub max_tokens: u64,
    pub headers: Option<Vec<(String, String)>>,
    pub capabilities: HashSet<String>,
}

impl Model {
    pub fn supports_function_calling(&self) -> bool {
        self.capabilities.iter().any(|c| c == "function_calling")
    }

    pub fn supports_modality(&self, modality: Modality) -> bool {
        self.input_modalities.contains(&modality)
    }
}
