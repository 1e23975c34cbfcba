//! Reconciliation handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::{AppError, AppState};
use recon_core::models::{ReconcileResult, ReconciliationOutcome};

/// Summary of a run over every account
#[derive(Debug, Serialize)]
pub struct ReconcileAllResponse {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ReconcileResult>,
}

/// POST /api/accounts/:id/reconcile - Reconcile one account
///
/// Failures before an outcome is recorded map to an error status; a
/// recorded but failed adjustment is reported in the body.
pub async fn reconcile_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ReconcileResult>, AppError> {
    match state.service.try_reconcile_account(id).await {
        Ok((outcome, insights)) => Ok(Json(ReconcileResult::from_attempt(outcome, insights))),
        Err(e) => {
            error!(account_id = id, "Reconciliation failed: {}", e);
            Err(e.into())
        }
    }
}

/// POST /api/accounts/:id/reconcile/manual - Operator-triggered reconciliation
///
/// Corrects any discrepancy beyond tolerance without the model gate.
pub async fn reconcile_account_manual(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ReconcileResult>, AppError> {
    info!(account_id = id, "Manual reconciliation requested via API");
    match state.service.try_reconcile_account_manual(id).await {
        Ok(outcome) => Ok(Json(ReconcileResult::from_outcome(outcome))),
        Err(e) => {
            error!(account_id = id, "Manual reconciliation failed: {}", e);
            Err(e.into())
        }
    }
}

/// POST /api/reconcile - Reconcile every account
pub async fn reconcile_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileAllResponse>, AppError> {
    let results = state.service.reconcile_all_accounts().await?;
    let succeeded = results.iter().filter(|r| r.success).count();

    Ok(Json(ReconcileAllResponse {
        total: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        results,
    }))
}

/// GET /api/reconciliation/status - Most recent outcomes across accounts
pub async fn reconciliation_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReconciliationOutcome>>, AppError> {
    let outcomes = state.service.reconciliation_status()?;
    Ok(Json(outcomes))
}
