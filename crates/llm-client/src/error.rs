use thiserror::Error;

/// Errors surfaced by provider adapters, the agent loop, and the tool validator.
///
/// Adapters convert every provider-library failure (`reqwest`, `sonic_rs`) into one of
/// these variants before it crosses the public API; a raw transport or decode error
/// never leaks out of this crate.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was supplied and none was found in the environment.
    #[error("no API key available for provider '{0}'")]
    MissingCredential(String),

    /// The adapter could not reach the provider, or the provider returned a non-2xx
    /// response with no more specific mapping.
    #[error("connection error: {0}")]
    TransportError(String),

    /// The caller's cancellation token was tripped.
    #[error("request aborted")]
    Aborted,

    /// Tool call arguments failed schema validation.
    #[error("tool '{tool}' arguments failed validation: {message}")]
    SchemaValidation { tool: String, message: String },

    /// A stream terminated with a recognized context-window overflow, or usage
    /// indicates the last request exceeded the model's context window.
    #[error("context window exceeded")]
    ContextOverflow,

    /// `Conversation::setCostLimit` budget exceeded.
    #[error("cost limit exceeded: spent {spent}, limit {limit}")]
    CostLimitExceeded { spent: f64, limit: f64 },

    /// `Conversation::setContextLimit` budget exceeded.
    #[error("context limit exceeded: last input {last_input} tokens, limit {limit}")]
    ContextLimitExceeded { last_input: u64, limit: u64 },

    /// A prompt was submitted while another prompt was already in flight.
    #[error("conversation is already processing a prompt")]
    Busy,

    /// Translating an assistant message produced by one provider into another
    /// provider's wire form has no implementation for this pair.
    #[error("translating a message from {from} to {to} is not supported: {reason}")]
    TranslationUnsupported {
        from: &'static str,
        to: &'static str,
        reason: String,
    },

    /// An unrecognized stop reason, malformed event ordering, or a field the
    /// adapter expected the provider to send was missing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `getModel` / adapter model resolution failed.
    #[error("model '{0}' is not known")]
    ModelNotFound(String),

    /// The request could not be built (e.g. an unsupported tool schema shape).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider's HTTP response had a non-2xx status not covered by a more
    /// specific variant.
    #[error("provider returned status {status}: {message}")]
    ProviderApiError { status: u16, message: String },
}

impl LlmError {
    /// Map an HTTP status from a provider response to a typed variant, following the
    /// same per-status switch every adapter uses.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::MissingCredential(body),
            404 => Self::ModelNotFound(body),
            400 => Self::InvalidRequest(body),
            _ => Self::ProviderApiError { status, message: body },
        }
    }

    /// A short, stable label for logs or metrics, independent of the formatted message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "missing_credential",
            Self::TransportError(_) => "transport_error",
            Self::Aborted => "aborted",
            Self::SchemaValidation { .. } => "schema_validation",
            Self::ContextOverflow => "context_overflow",
            Self::CostLimitExceeded { .. } => "cost_limit_exceeded",
            Self::ContextLimitExceeded { .. } => "context_limit_exceeded",
            Self::Busy => "busy",
            Self::TranslationUnsupported { .. } => "translation_unsupported",
            Self::Protocol(_) => "protocol_error",
            Self::ModelNotFound(_) => "model_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ProviderApiError { .. } => "provider_api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
