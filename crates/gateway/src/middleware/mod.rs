//! Request pipeline stages, outermost first:
//! request id → CORS → access log (`TraceLayer` hooks) → failure catch-all →
//! panic catcher → rate limit → auth

pub mod access_log;
pub mod auth;
pub mod failure;
pub mod rate_limit;
pub mod request_id;
