//! Health check handlers

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    /// Seconds since the gateway started
    pub uptime: f64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub timestamp: String,
}

/// Liveness check: healthy whenever the server is running
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        service: "API Gateway".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "API Gateway is running".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
