use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// Use anyhow::Result for internal plumbing (config loading)
// Use thiserror for errors the failover loop and the UI need to tell apart

/// Errors raised by the generation orchestration layer
#[derive(Error, Debug, Clone)]
pub enum StudioError {
    /// No usable provider profile (missing API key or base URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Video job not found: {0}")]
    JobNotFound(String),

    /// Non-2xx status or network failure
    #[error("Provider '{provider}' request failed{}: {message}", status_suffix(.status))]
    Transport {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// The provider explicitly reported that generation failed
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Generation still running: {0}")]
    GenerationStillRunning(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("All providers failed after {attempts} attempts (last provider: {provider}): {message}")]
    AllProvidersFailed {
        attempts: u32,
        provider: String,
        message: String,
    },

    #[error("Failed to parse model reply: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl StudioError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn transport(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failover loop may rotate to another provider and try again.
    ///
    /// Configuration and request errors would fail the same way everywhere.
    /// A video timeout belongs to a job one provider already accepted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StudioError::Transport { .. }
                | StudioError::MalformedResponse(_)
                | StudioError::GenerationFailed(_)
                | StudioError::GenerationStillRunning(_)
                | StudioError::Parse(_)
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            StudioError::Configuration(_) => "configuration_error",
            StudioError::InvalidRequest(_) => "invalid_request_error",
            StudioError::ProviderNotFound(_) | StudioError::JobNotFound(_) => "not_found",
            StudioError::Transport { .. } => "transport_error",
            StudioError::MalformedResponse(_) => "malformed_response",
            StudioError::GenerationFailed(_) => "generation_failed",
            StudioError::GenerationStillRunning(_) => "generation_still_running",
            StudioError::Timeout(_) => "timeout",
            StudioError::AllProvidersFailed { .. } => "all_providers_failed",
            StudioError::Parse(_) => "parse_error",
            StudioError::Storage(_) => "storage_error",
            StudioError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            StudioError::Configuration(_) => StatusCode::PRECONDITION_FAILED,
            StudioError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StudioError::ProviderNotFound(_) | StudioError::JobNotFound(_) => StatusCode::NOT_FOUND,
            StudioError::Transport { .. }
            | StudioError::MalformedResponse(_)
            | StudioError::GenerationFailed(_)
            | StudioError::GenerationStillRunning(_)
            | StudioError::AllProvidersFailed { .. }
            | StudioError::Parse(_) => StatusCode::BAD_GATEWAY,
            StudioError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StudioError::Storage(_) | StudioError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert StudioError to HTTP response
impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));

        (self.status_code(), body).into_response()
    }
}

/// Convert from anyhow::Error to StudioError for error context
impl From<anyhow::Error> for StudioError {
    fn from(err: anyhow::Error) -> Self {
        // Log the full error chain for debugging
        tracing::error!("Application error: {:?}", err);
        StudioError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        StudioError::Parse(err.to_string())
    }
}

/// Helper type for results that use StudioError
pub type StudioResult<T> = Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_status() {
        let err = StudioError::transport("yunwu", Some(503), "upstream busy");
        assert_eq!(
            err.to_string(),
            "Provider 'yunwu' request failed (HTTP 503): upstream busy"
        );

        let err = StudioError::transport("tuzi", None, "connection refused");
        assert_eq!(err.to_string(), "Provider 'tuzi' request failed: connection refused");
    }

    #[test]
    fn test_retry_policy() {
        assert!(StudioError::malformed("x").is_retryable());
        assert!(StudioError::GenerationFailed("x".into()).is_retryable());
        assert!(StudioError::GenerationStillRunning("x".into()).is_retryable());
        assert!(!StudioError::configuration("x").is_retryable());
        assert!(!StudioError::Timeout("x".into()).is_retryable());
        assert!(!StudioError::invalid_request("x").is_retryable());
    }

    #[test]
    fn test_into_response_status() {
        let response = StudioError::Timeout("video".into()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = StudioError::configuration("no key").into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }
}
