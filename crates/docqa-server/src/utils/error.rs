use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Sub-kinds of LLM/embedding provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LlmErrorKind {
    RateLimit,
    Timeout,
    Auth,
    Network,
    InvalidRequest,
    Service,
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a reqwest failure into the provider error taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(LlmErrorKind::Timeout, err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::new(LlmErrorKind::Network, err.to_string())
        } else {
            Self::new(LlmErrorKind::Service, err.to_string())
        }
    }

    /// Classify a non-2xx provider status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let kind = match status.as_u16() {
            429 => LlmErrorKind::RateLimit,
            401 | 403 => LlmErrorKind::Auth,
            400 | 404 | 422 => LlmErrorKind::InvalidRequest,
            408 | 504 => LlmErrorKind::Timeout,
            _ => LlmErrorKind::Service,
        };
        Self::new(kind, format!("{}: {}", status, body))
    }

    /// Whether a retry with backoff can reasonably help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            LlmErrorKind::RateLimit
                | LlmErrorKind::Timeout
                | LlmErrorKind::Network
                | LlmErrorKind::Service
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Document processing failed: {0}")]
    DocumentProcess(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<LlmError>() {
            Ok(llm) => AppError::Llm(llm),
            Err(other) => AppError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::DocumentProcess(msg) => {
                tracing::warn!("Document processing error: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "DocumentProcess", msg)
            }
            AppError::InvalidArgument(msg) => {
                tracing::warn!("Invalid argument: {}", msg);
                (StatusCode::BAD_REQUEST, "InvalidArgument", msg)
            }
            AppError::FileTooLarge(msg) => {
                tracing::warn!("File too large: {}", msg);
                (StatusCode::PAYLOAD_TOO_LARGE, "FileTooLarge", msg)
            }
            AppError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            AppError::Llm(err) => {
                tracing::error!("LLM error: {}", err);
                let status = match err.kind {
                    LlmErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
                    LlmErrorKind::Auth => StatusCode::UNAUTHORIZED,
                    LlmErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
                    LlmErrorKind::Timeout | LlmErrorKind::Network | LlmErrorKind::Service => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, "LlmError", err.message)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_status_classification() {
        let err = LlmError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert_eq!(err.kind, LlmErrorKind::RateLimit);
        assert!(err.is_retryable());

        let err = LlmError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".into());
        assert_eq!(err.kind, LlmErrorKind::Auth);
        assert!(!err.is_retryable());

        let err = LlmError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream".into());
        assert_eq!(err.kind, LlmErrorKind::Service);
    }

    #[test]
    fn anyhow_downcast_preserves_llm_kind() {
        let source = LlmError::new(LlmErrorKind::RateLimit, "limited");
        let wrapped: anyhow::Error = source.into();
        match AppError::from(wrapped) {
            AppError::Llm(err) => assert_eq!(err.kind, LlmErrorKind::RateLimit),
            other => panic!("expected Llm variant, got {:?}", other),
        }
    }
}
