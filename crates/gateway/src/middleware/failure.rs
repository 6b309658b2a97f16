//! Catch-all for unexpected failures
//!
//! Any 500 produced below this stage carries a [`FailureDetail`]. It is logged
//! once here with the request context; outside production the envelope message
//! is replaced with the detail.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use orderly_common::errors::{ApiResponse, AppError, ErrorCode, FailureDetail};
use std::any::Any;

use crate::context::RequestContext;
use crate::AppState;

pub async fn failure_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let Some(FailureDetail(detail)) = response.extensions().get::<FailureDetail>().cloned() else {
        return response;
    };

    tracing::error!(
        request_id = %ctx.as_ref().map(|c| c.request_id.as_str()).unwrap_or_default(),
        method = %method,
        path = %path,
        error = %detail,
        "Unhandled error"
    );

    if !state.config.expose_error_details() {
        return response;
    }

    let body = ApiResponse::<()>::failure(ErrorCode::InternalError, detail);
    match serde_json::to_vec(&body) {
        Ok(bytes) => {
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(_) => response,
    }
}

/// Turn a panic inside the pipeline into an internal error response
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "panic with non-string payload".to_string()
    };

    AppError::Internal {
        message: format!("panic: {}", message),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_panic_response_is_internal_error() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = response.extensions().get::<FailureDetail>().unwrap();
        assert!(detail.0.contains("panic: boom"));
    }
}
