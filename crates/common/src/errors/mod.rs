//! Error types for Orderly services
//!
//! Provides the error taxonomy shared by the gateway and the backends:
//! - Distinct error types for each externally visible failure mode
//! - HTTP status code mapping
//! - The uniform `{ success, data | error }` response envelope
//! - Error codes for client handling

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Message used for 500 responses when failure detail must not leak
pub const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication
    Unauthorized,
    InvalidToken,

    // Admission control
    RateLimitExceeded,
    AuthRateLimitExceeded,

    // Request
    BadRequest,
    NotFound,
    PayloadTooLarge,

    // Upstream
    ServiceUnavailable,

    // Internal
    InternalError,
}

impl ErrorCode {
    /// Wire representation, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::AuthRateLimitExceeded => "AUTH_RATE_LIMIT_EXCEEDED",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("{message}")]
    Unauthorized { message: String },

    #[error("Invalid or expired token")]
    InvalidToken { reason: String },

    // Admission control
    #[error("Too many requests, please try again later")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    #[error("Too many login attempts, please try again later")]
    AuthRateLimited { limit: u32, retry_after_secs: u64 },

    // Request errors
    #[error("Request body could not be read")]
    BadRequest { reason: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Payload too large: request body exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Upstream errors
    #[error("{service} service is temporarily unavailable")]
    ServiceUnavailable { service: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Shorthand for the missing-credential rejection
    pub fn missing_token() -> Self {
        AppError::Unauthorized {
            message: "Access token is required".to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken { .. } => ErrorCode::InvalidToken,
            AppError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            AppError::AuthRateLimited { .. } => ErrorCode::AuthRateLimitExceeded,
            AppError::BadRequest { .. } => ErrorCode::BadRequest,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Internal { .. } | AppError::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::InvalidToken { .. } => StatusCode::FORBIDDEN,

            // 400 Bad Request
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound => StatusCode::NOT_FOUND,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } | AppError::AuthRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            AppError::Internal { .. } | AppError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status_code(),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        )
    }

    /// Message safe to show a client. Internal failures are reduced to a
    /// generic message; the detail travels separately as a [`FailureDetail`].
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::InternalError => GENERIC_INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Underlying cause of a 500 response, attached as a response extension so the
/// catch-all stage can log it and decide whether to expose it.
#[derive(Debug, Clone)]
pub struct FailureDetail(pub String);

/// Uniform response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// Successful envelope carrying `data`
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed envelope carrying a code and message
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorDetails {
                code,
                message: message.into(),
            }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let body = ApiResponse::<()>::failure(code, self.public_message());

        let mut response = (status, Json(body)).into_response();

        match &self {
            AppError::RateLimited {
                retry_after_secs, ..
            }
            | AppError::AuthRateLimited {
                retry_after_secs, ..
            } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }

        if code == ErrorCode::InternalError {
            response
                .extensions_mut()
                .insert(FailureDetail(self.to_string()));
        }

        response
    }
}
