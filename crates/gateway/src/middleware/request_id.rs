//! Request ID middleware
//!
//! Propagates a non-empty inbound `X-Request-ID` or generates a UUIDv4, stores
//! it in the [`RequestContext`] and echoes it on every response.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use orderly_common::auth::REQUEST_ID_HEADER;
use uuid::Uuid;

use crate::context::RequestContext;

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext::new(request_id.clone(), &request);
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
