//! Per-request context carried in request extensions

use axum::{
    extract::{ConnectInfo, Request},
    http::Method,
};
use orderly_common::{auth::IdentityClaims, errors::AppError};
use std::net::SocketAddr;

/// Key used when the peer address is unknown (e.g. in-process calls)
pub const UNKNOWN_CLIENT: &str = "unknown";

/// State owned by one request for its whole lifetime.
///
/// `identity` is only ever set by the authorization gate after the bearer
/// token verified in this same request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client: String,
    pub method: Method,
    pub path: String,
    pub identity: Option<IdentityClaims>,
}

impl RequestContext {
    pub fn new(request_id: String, request: &Request) -> Self {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        Self {
            request_id,
            client,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            identity: None,
        }
    }

    /// Fetch the context installed by the correlation stage
    pub fn of(request: &Request) -> Result<Self, AppError> {
        request
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal {
                message: "request context missing; correlation stage did not run".to_string(),
            })
    }
}
