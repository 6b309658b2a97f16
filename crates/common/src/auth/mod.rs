//! Authentication utilities
//!
//! Provides:
//! - Bearer credential extraction
//! - JWT token generation and validation (HS256, shared secret)
//! - The identity headers the gateway forwards to backends
//!
//! Backends trust `X-User-*` headers only because the gateway is the sole
//! network entry point; they must never be reachable directly.

use crate::errors::{AppError, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Correlation header propagated across every hop
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Verified subject identifier
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Verified email
pub const USER_EMAIL_HEADER: HeaderName = HeaderName::from_static("x-user-email");

/// Verified roles, JSON-encoded array of strings
pub const USER_ROLES_HEADER: HeaderName = HeaderName::from_static("x-user-roles");

/// All identity headers, in the order they are written
pub const IDENTITY_HEADERS: [HeaderName; 3] =
    [USER_ID_HEADER, USER_EMAIL_HEADER, USER_ROLES_HEADER];

/// Identity decoded from a verified bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Subject (user ID)
    pub user_id: String,

    pub email: String,

    pub roles: Vec<String>,
}

impl IdentityClaims {
    /// Remove any identity headers and write the verified ones.
    ///
    /// Client-supplied `X-User-*` values never survive this call.
    pub fn write_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        strip_identity_headers(headers);

        let roles = serde_json::to_string(&self.roles)?;
        for (name, value) in IDENTITY_HEADERS
            .iter()
            .zip([self.user_id.as_str(), self.email.as_str(), roles.as_str()])
        {
            let value = HeaderValue::from_str(value).map_err(|_| AppError::InvalidToken {
                reason: format!("claim for {} is not a valid header value", name),
            })?;
            headers.insert(name.clone(), value);
        }

        Ok(())
    }
}

/// Remove every identity header from `headers`
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    for name in &IDENTITY_HEADERS {
        headers.remove(name);
    }
}

/// JWT claims structure as issued by the users service
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// User ID as issued by the users service
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Registered subject claim, used when `id` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    pub email: String,

    /// Roles
    #[serde(default)]
    pub roles: Vec<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

impl TryFrom<JwtClaims> for IdentityClaims {
    type Error = AppError;

    fn try_from(claims: JwtClaims) -> Result<Self> {
        let user_id = if claims.id.is_empty() {
            claims
                .sub
                .filter(|sub| !sub.is_empty())
                .ok_or_else(|| AppError::InvalidToken {
                    reason: "MissingSubject".to_string(),
                })?
        } else {
            claims.id
        };

        Ok(Self {
            user_id,
            email: claims.email,
            roles: claims.roles,
        })
    }
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, identity: &IdentityClaims) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            id: identity.user_id.clone(),
            sub: None,
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        self.encode(&claims)
    }

    /// Sign arbitrary claims
    pub fn encode(&self, claims: &JwtClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e)
            })
    }

    /// Validate signature and expiry, then decode the identity
    pub fn validate_token(&self, token: &str) -> Result<IdentityClaims> {
        let data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::InvalidToken {
                reason: format!("{:?}", e.kind()),
            })?;
        IdentityClaims::try_from(data.claims)
    }
}

/// Extract the credential from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let (scheme, token) = auth_header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
