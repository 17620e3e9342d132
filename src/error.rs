//! Munin error types

use std::time::Duration;

/// Munin error types
#[derive(Debug, thiserror::Error)]
pub enum MuninError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // Client input errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // LLM output errors
    #[error("failed to parse model output: {0}")]
    Parsing(String),

    #[error("empty response from model")]
    EmptyResponse,

    // Registry / experiment errors
    #[error("no prompt template for category '{category}'")]
    TemplateNotFound { category: String },

    #[error("no prompt template with id '{0}'")]
    TemplateIdNotFound(String),

    #[error("template id '{0}' is already registered")]
    DuplicateTemplate(String),

    #[error("invalid experiment: {0}")]
    ExperimentValidation(String),

    #[error("experiment '{0}' is not available for assignment")]
    ExperimentUnavailable(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MuninError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Rate limits and transport failures may clear on their own;
    /// everything else (bad input, bad config, parse failures) will
    /// fail identically on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status code this error maps to at the route boundary.
    ///
    /// Provider errors mirror the provider's status when one is known,
    /// per the error-propagation policy; everything unexpected is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::Api { status, .. } if *status >= 400 => *status,
            _ => 500,
        }
    }

    /// User-safe message, without internal detail.
    ///
    /// Raw provider payloads and malformed model output are logged
    /// server-side only; the client sees the diagnostic category.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::RateLimited { .. } => {
                "Rate limit exceeded. Please retry later.".to_string()
            }
            Self::Api { status, .. } => {
                format!("Upstream provider error (status {status})")
            }
            Self::Http(_) => "Failed to reach the analysis provider".to_string(),
            Self::AuthenticationFailed => {
                "Upstream provider rejected the configured credentials".to_string()
            }
            Self::Parsing(_) | Self::EmptyResponse | Self::Json(_) => {
                "Failed to parse the analysis response".to_string()
            }
            Self::Configuration(_) => "Service is not configured correctly".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Result type alias for munin operations
pub type Result<T> = std::result::Result<T, MuninError>;
