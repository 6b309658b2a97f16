//! One structured record per completed request
//!
//! Hooks for `tower_http::trace::TraceLayer`. The span carries the request
//! identity (`request_id`, `client`, `method`, `path`); the response hook emits
//! the record inside it at a level chosen by outcome.

use axum::{extract::Request, response::Response};
use orderly_common::{errors::FailureDetail, metrics};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Span};

use crate::context::{RequestContext, UNKNOWN_CLIENT};

/// Severity of an access record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Info,
    Warn,
    Error,
}

impl AccessLevel {
    pub fn for_outcome(status: u16, failed: bool) -> Self {
        if failed || status >= 500 {
            AccessLevel::Error
        } else if status >= 400 {
            AccessLevel::Warn
        } else {
            AccessLevel::Info
        }
    }

    /// A response carrying a [`FailureDetail`] is an unhandled failure
    pub fn of(response: &Response) -> Self {
        let failed = response.extensions().get::<FailureDetail>().is_some();
        Self::for_outcome(response.status().as_u16(), failed)
    }
}

pub fn make_span(request: &Request) -> Span {
    let (request_id, client) = match request.extensions().get::<RequestContext>() {
        Some(ctx) => (ctx.request_id.as_str(), ctx.client.as_str()),
        None => ("", UNKNOWN_CLIENT),
    };

    info_span!(
        "request",
        request_id = %request_id,
        client = %client,
        method = %request.method(),
        path = %request.uri().path(),
    )
}

pub fn on_request(request: &Request, _span: &Span) {
    metrics::record_request(request.method().as_str());
}

pub fn on_response(response: &Response, latency: Duration, _span: &Span) {
    let status = response.status().as_u16();
    let latency_ms = latency.as_millis() as u64;

    match AccessLevel::of(response) {
        AccessLevel::Error => error!(status, latency_ms, "request failed"),
        AccessLevel::Warn => warn!(status, latency_ms, "request rejected"),
        AccessLevel::Info => info!(status, latency_ms, "request completed"),
    }

    metrics::record_response(status, latency);
}
