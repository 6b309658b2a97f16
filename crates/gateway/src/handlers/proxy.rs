//! Reverse proxy to the backend services
//!
//! Paths are forwarded unmodified to the upstream chosen by longest prefix.
//! Transport failures never reach the client raw: they become a 503 envelope
//! naming the upstream that failed. Request bodies are buffered up to the
//! configured cap; upstream response bodies are streamed back as they arrive.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use orderly_common::{
    auth::{strip_identity_headers, REQUEST_ID_HEADER},
    errors::{AppError, Result},
    metrics,
};
use http_body_util::LengthLimitError;
use std::time::Duration;

use crate::context::RequestContext;
use crate::routes::Upstream;
use crate::AppState;

/// Headers meaningful for a single connection only
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
}

/// HTTP client for forwarding requests to upstreams
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    /// Forward `request` to `upstream` and relay its response.
    ///
    /// Dropping the returned future (client gone) drops the in-flight upstream
    /// call with it.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        ctx: &RequestContext,
        request: Request,
    ) -> Result<Response> {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", upstream.base_url, path_and_query);

        let declared_len = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > self.max_body_bytes) {
            return Err(AppError::PayloadTooLarge { limit: self.max_body_bytes });
        }
        let body = match to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) if exceeds_limit(&e) => {
                return Err(AppError::PayloadTooLarge { limit: self.max_body_bytes })
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    path = %ctx.path,
                    error = %e,
                    "Failed to read request body"
                );
                return Err(AppError::BadRequest { reason: e.to_string() });
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        strip_identity_headers(&mut headers);
        headers.insert(REQUEST_ID_HEADER, header_value(&ctx.request_id)?);
        if let Some(identity) = &ctx.identity {
            identity.write_headers(&mut headers)?;
        }

        tracing::info!(
            request_id = %ctx.request_id,
            method = %parts.method,
            path = %ctx.path,
            target = %upstream.base_url,
            "Proxying to {} Service",
            upstream.display_name
        );

        let result = self
            .client
            .request(parts.method.clone(), &target)
            .headers(headers)
            .body(body)
            .send()
            .await;

        let upstream_response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.unavailable(upstream, ctx, &e)),
        };

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        response_headers.insert(REQUEST_ID_HEADER, header_value(&ctx.request_id)?);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn unavailable(&self, upstream: &Upstream, ctx: &RequestContext, err: &reqwest::Error) -> AppError {
        tracing::error!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            target = %upstream.base_url,
            timeout = err.is_timeout(),
            error = %err,
            "Proxy error to {} Service",
            upstream.display_name
        );
        metrics::record_upstream_failure(upstream.name);

        AppError::ServiceUnavailable {
            service: upstream.display_name.to_string(),
        }
    }
}

/// Whether a body read failed because it outgrew the cap, as opposed to the
/// client aborting or sending a malformed stream
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AppError::Internal {
        message: format!("invalid header value: {}", e),
    })
}

/// Terminal handler: forward to the matching upstream or 404
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let ctx = RequestContext::of(&request)?;

    let Some(upstream) = state.routes.resolve(&ctx.path) else {
        tracing::warn!(request_id = %ctx.request_id, path = %ctx.path, "Route not found");
        return Err(AppError::NotFound);
    };

    state.forwarder.forward(upstream, &ctx, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[tokio::test]
    async fn test_exceeds_limit_only_for_length_errors() {
        let err = to_bytes(Body::from("0123456789"), 4).await.unwrap_err();
        assert!(exceeds_limit(&err));

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("client went away")),
        ]);
        let err = to_bytes(Body::from_stream(chunks), 1024).await.unwrap_err();
        assert!(!exceeds_limit(&err));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    }
}
