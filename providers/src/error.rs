use thiserror::Error;

/// Wire-level failures from provider calls. The pipeline's failure
/// classifier maps these onto retry/fallback/abort decisions.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("authentication rejected: {message}")]
    Auth { message: String },

    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Map a non-success HTTP status plus response body onto the taxonomy.
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            429 => ProviderError::RateLimited { retry_after_secs },
            401 | 403 => ProviderError::Auth { message: body },
            _ => ProviderError::Api {
                status,
                message: body,
            },
        }
    }
}
