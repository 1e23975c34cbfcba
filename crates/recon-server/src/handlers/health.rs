//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use recon_core::BalanceProvider;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_trained: bool,
    pub provider: String,
}

/// GET /api/health - Liveness and model readiness
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_trained: state.service.model().is_trained(),
        provider: state.service.provider().host().to_string(),
    })
}
