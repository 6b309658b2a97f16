//! Authorization gate
//!
//! Public routes pass through untouched. Everything else needs a bearer token
//! that verifies against the shared secret; the decoded identity is written as
//! `X-User-*` headers for the backend. Inbound `X-User-*` headers are always
//! discarded first, whatever the outcome.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use orderly_common::{
    auth::{extract_bearer_token, strip_identity_headers, IdentityClaims, JwtManager},
    errors::{AppError, Result},
    metrics,
};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::routes::PublicRoutes;
use crate::AppState;

/// Result of evaluating one request against the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Route is on the exemption list; credentials were not inspected
    Exempt,
    /// Credential verified in this request
    Authorized(IdentityClaims),
}

pub struct AuthorizationGate {
    public_routes: PublicRoutes,
    jwt: Arc<JwtManager>,
}

impl AuthorizationGate {
    pub fn new(public_routes: PublicRoutes, jwt: Arc<JwtManager>) -> Self {
        Self { public_routes, jwt }
    }

    /// Decide whether a request may proceed
    pub fn evaluate(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<Authorization> {
        if self.public_routes.is_public(method, path) {
            return Ok(Authorization::Exempt);
        }

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer_token)
            .ok_or_else(AppError::missing_token)?;

        self.jwt.validate_token(token).map(Authorization::Authorized)
    }
}

/// Middleware for bearer token authorization
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let mut ctx = RequestContext::of(&request)?;
    strip_identity_headers(request.headers_mut());

    let decision = state
        .gate
        .evaluate(request.method(), request.uri().path(), request.headers());

    match decision {
        Ok(Authorization::Exempt) => {}
        Ok(Authorization::Authorized(identity)) => {
            identity.write_headers(request.headers_mut())?;
            tracing::debug!(
                request_id = %ctx.request_id,
                user_id = %identity.user_id,
                "Request authorized"
            );
            ctx.identity = Some(identity);
            request.extensions_mut().insert(ctx);
        }
        Err(e) => {
            if let AppError::InvalidToken { reason } = &e {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    path = %ctx.path,
                    error = %reason,
                    "Invalid token"
                );
                metrics::record_auth_rejection("invalid_token");
            } else {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    path = %ctx.path,
                    "No token provided for protected route"
                );
                metrics::record_auth_rejection("missing_token");
            }
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use orderly_common::errors::ErrorCode;

    const SECRET: &str = "gate-secret";

    fn gate() -> AuthorizationGate {
        AuthorizationGate::new(
            PublicRoutes::standard().unwrap(),
            Arc::new(JwtManager::new(SECRET, 3600)),
        )
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn identity() -> IdentityClaims {
        IdentityClaims {
            user_id: "u-1".into(),
            email: "u@example.com".into(),
            roles: vec!["user".into()],
        }
    }

    #[test]
    fn test_exempt_routes_skip_credentials() {
        let gate = gate();
        let garbage = bearer("garbage");
        for (method, path) in [
            (Method::POST, "/v1/users/login"),
            (Method::POST, "/v1/users/register"),
            (Method::GET, "/health"),
            (Method::GET, "/status"),
        ] {
            assert_eq!(gate.evaluate(&method, path, &HeaderMap::new()).unwrap(), Authorization::Exempt);
            assert_eq!(gate.evaluate(&method, path, &garbage).unwrap(), Authorization::Exempt);
        }
    }

    #[test]
    fn test_missing_token_is_unauthorized() {
        let err = gate()
            .evaluate(&Method::GET, "/v1/orders", &HeaderMap::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert_eq!(err.status_code().as_u16(), 401);

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        let err = gate().evaluate(&Method::GET, "/v1/orders", &basic).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn test_bad_signature_is_invalid_token() {
        let token = JwtManager::new("other-secret", 3600).generate_token(&identity()).unwrap();
        let err = gate()
            .evaluate(&Method::GET, "/v1/orders", &bearer(&token))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidToken);
        assert_eq!(err.status_code().as_u16(), 403);
    }

    #[test]
    fn test_valid_token_authorizes() {
        let token = JwtManager::new(SECRET, 3600).generate_token(&identity()).unwrap();
        let decision = gate()
            .evaluate(&Method::GET, "/v1/orders/42", &bearer(&token))
            .unwrap();
        assert_eq!(decision, Authorization::Authorized(identity()));
    }
}
