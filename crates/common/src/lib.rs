//! Orderly Common Library
//!
//! Shared code for the Orderly gateway and services including:
//! - Error types and the uniform response envelope
//! - Configuration management
//! - Authentication utilities and identity headers
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use auth::{IdentityClaims, JwtManager};
pub use config::AppConfig;
pub use errors::{ApiResponse, AppError, ErrorCode, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
