//! Account management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use recon_core::models::{Account, AdjustmentRecord, NewAccount, ReconciliationOutcome};

/// Query parameters for listing an account's outcomes
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/accounts - List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Account>>, AppError> {
    let accounts = state.service.list_accounts()?;
    Ok(Json(accounts))
}

/// POST /api/accounts - Register an account
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewAccount>,
) -> Result<Json<Account>, AppError> {
    if req.external_ref.trim().is_empty() {
        return Err(AppError::bad_request("external_ref is required"));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let account = state.service.create_account(&req)?;
    Ok(Json(account))
}

/// GET /api/accounts/:id/adjustments - Adjustments applied to an account, newest first
pub async fn account_adjustments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<AdjustmentRecord>>, AppError> {
    let adjustments = state.service.account_adjustments(id)?;
    Ok(Json(adjustments))
}

/// GET /api/accounts/:id/reconciliations - An account's outcomes, newest first
pub async fn account_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<ReconciliationOutcome>>, AppError> {
    let limit = params.limit.unwrap_or(50).min(MAX_PAGE_LIMIT);
    let outcomes = state.service.account_history(id, limit)?;
    Ok(Json(outcomes))
}
