//! Model, insight and policy handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{AppError, AppState};
use recon_core::models::{AccountInsights, ModelStatus};
use recon_core::{PolicyDecision, PolicyQuery, RetrainOutcome, TrainingReport};

/// Response for a training run
#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: TrainingReport,
}

/// Request body for a retraining check; defaults come from the scheduler
/// config
#[derive(Debug, Default, Deserialize)]
pub struct RetrainRequest {
    /// Window length in hours
    pub hours: Option<u64>,
    pub min_new: Option<usize>,
}

/// GET /api/accounts/:id/insights - Current signals for an account
pub async fn get_insights(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<AccountInsights>, AppError> {
    let insights = state.service.get_insights(id).await.map_err(|e| {
        error!(account_id = id, "Failed to compute insights: {}", e);
        e
    })?;
    Ok(Json(insights))
}

/// POST /api/ai/train - Train from completed outcomes now
pub async fn train_model(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TrainResponse>, AppError> {
    info!("Training requested via API");
    let report = state.service.train_model().await.map_err(|e| {
        error!("Training failed: {}", e);
        e
    })?;
    Ok(Json(TrainResponse {
        success: true,
        report,
    }))
}

/// POST /api/ai/retrain - Retrain if enough new outcomes arrived
pub async fn retrain_model(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RetrainRequest>>,
) -> Result<Json<RetrainOutcome>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let defaults = &state.service.config().scheduler;
    let hours = req.hours.unwrap_or(defaults.training_interval_hours);
    let min_new = req.min_new.unwrap_or(defaults.min_new_reconciliations);

    let outcome = state.service.retrain_recent(hours, min_new).await?;
    Ok(Json(outcome))
}

/// GET /api/ai/status - Model readiness and last training metrics
pub async fn model_status(State(state): State<Arc<AppState>>) -> Json<ModelStatus> {
    Json(state.service.model_status())
}

/// POST /api/ai/policy - Evaluate the auto-adjust policy for given signals
pub async fn evaluate_policy(
    State(state): State<Arc<AppState>>,
    Json(query): Json<PolicyQuery>,
) -> Json<PolicyDecision> {
    Json(state.service.evaluate_policy(&query))
}
