//! HTTP error type for the `orgsecrets` server.
//!
//! Maps domain errors from `orgsecrets-core` into HTTP responses. Every
//! response carries a JSON body with a machine-readable `error` field and a
//! human-readable `message`. Internal and store failures are logged and
//! answered with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use orgsecrets_core::error::{AccountError, AuthError, RegistryError, SecretError};

/// Error returned from HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, invalid, or expired credentials.
    #[error("unauthorized: {message}")]
    Unauthorized { error: &'static str, message: String },

    /// Authenticated, but not allowed to act on the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Well-formed request with unusable values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The organization reached its plan limit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A backing store is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request deadline elapsed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Internal error, never echoed to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized { error, message } => (StatusCode::UNAUTHORIZED, error, message),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::InvalidInput(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", msg),
            Self::QuotaExceeded(msg) => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", msg),
            Self::Unavailable(msg) => {
                tracing::error!(error = %msg, "backing store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "service temporarily unavailable".to_owned(),
                )
            }
            Self::DeadlineExceeded(msg) => {
                tracing::warn!(error = %msg, "request deadline exceeded");
                (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", msg)
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict { .. } => Self::Conflict(err.to_string()),
            RegistryError::NotFound { .. } => Self::NotFound(err.to_string()),
            RegistryError::Unavailable { .. } => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::Unauthorized {
                error: "invalid_credentials",
                message: err.to_string(),
            },
            AuthError::InvalidToken => Self::Unauthorized {
                error: "invalid_token",
                message: err.to_string(),
            },
            AuthError::TokenExpired => Self::Unauthorized {
                error: "token_expired",
                message: err.to_string(),
            },
            AuthError::UserExists => Self::Conflict(err.to_string()),
            AuthError::InvalidInput { .. } => Self::InvalidInput(err.to_string()),
            AuthError::UserNotFound => Self::NotFound(err.to_string()),
            AuthError::Registry(inner) => inner.into(),
            AuthError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::OrganizationNotFound { .. } => Self::NotFound(err.to_string()),
            AccountError::NameConflict { .. } => Self::Conflict(err.to_string()),
            AccountError::InvalidName { .. } => Self::InvalidInput(err.to_string()),
            AccountError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            AccountError::Registry(inner) => inner.into(),
        }
    }
}

impl From<SecretError> for ApiError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::QuotaExceeded { .. } => Self::QuotaExceeded(err.to_string()),
            SecretError::SecretNotFound { .. } | SecretError::OrganizationNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            SecretError::SecretExists { .. } => Self::Conflict(err.to_string()),
            SecretError::InvalidPath { .. } => Self::InvalidInput(err.to_string()),
            SecretError::DeadlineExceeded { .. } => Self::DeadlineExceeded(err.to_string()),
            SecretError::StoreUnavailable { .. } => Self::Unavailable(err.to_string()),
            SecretError::InconsistentState { .. } => Self::Internal(err.to_string()),
        }
    }
}
