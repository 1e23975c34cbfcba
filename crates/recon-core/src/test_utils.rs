//! Test utilities for recon-core
//!
//! This module provides a mock balance provider server speaking the same
//! REST contract as the real provider, for integration tests of
//! `HttpProvider`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::TransactionRecord;

#[derive(Default)]
struct ServerState {
    balances: HashMap<String, f64>,
    transactions: HashMap<String, Vec<TransactionRecord>>,
    adjustments: Vec<(String, f64)>,
    /// Body returned for accepted adjustments instead of the default receipt
    adjustment_reply: Option<Value>,
    last_authorization: Option<String>,
}

type Shared = Arc<Mutex<ServerState>>;

/// Mock provider server for testing
pub struct MockProviderServer {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockProviderServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/accounts/:id", get(handle_balance))
            .route("/accounts/:id/transactions", get(handle_transactions))
            .route("/accounts/:id/adjustments", post(handle_adjustment))
            .route("/accounts/:id/status", get(handle_status))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_balance(&self, external_ref: &str, balance: f64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(external_ref.to_string(), balance);
    }

    pub fn push_transaction(&self, external_ref: &str, amount: f64, created_at: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .entry(external_ref.to_string())
            .or_default()
            .push(TransactionRecord { amount, created_at });
    }

    /// Reply to accepted adjustments with `body` from now on
    pub fn set_adjustment_reply(&self, body: Value) {
        self.state.lock().unwrap().adjustment_reply = Some(body);
    }

    /// Adjustments received, as `(external_ref, amount)`
    pub fn adjustments(&self) -> Vec<(String, f64)> {
        self.state.lock().unwrap().adjustments.clone()
    }

    /// Authorization header of the most recent request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().unwrap().last_authorization.clone()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockProviderServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_auth(state: &Shared, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    state.lock().unwrap().last_authorization = auth;
}

async fn handle_balance(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    record_auth(&state, &headers);
    let balance = state.lock().unwrap().balances.get(&id).copied();
    balance
        .map(|b| Json(json!({ "id": id, "balance": b })))
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct TransactionsQuery {
    start_date: Option<String>,
}

async fn handle_transactions(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Query(query): Query<TransactionsQuery>,
    headers: HeaderMap,
) -> Json<Value> {
    record_auth(&state, &headers);
    let start = query
        .start_date
        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc());

    let items: Vec<TransactionRecord> = state
        .lock()
        .unwrap()
        .transactions
        .get(&id)
        .map(|txns| {
            txns.iter()
                .filter(|t| start.map_or(true, |s| t.created_at >= s))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Json(json!({ "items": items }))
}

#[derive(Deserialize)]
struct AdjustmentBody {
    amount: f64,
    description: String,
}

async fn handle_adjustment(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AdjustmentBody>,
) -> Result<Json<Value>, StatusCode> {
    record_auth(&state, &headers);
    let mut state = state.lock().unwrap();
    if !state.balances.contains_key(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    state.adjustments.push((id, body.amount));
    if let Some(reply) = state.adjustment_reply.clone() {
        return Ok(Json(reply));
    }
    let adjustment_id = format!("adj_{}", state.adjustments.len());

    Ok(Json(json!({
        "id": adjustment_id,
        "amount": body.amount,
        "description": body.description,
    })))
}

async fn handle_status(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    record_auth(&state, &headers);
    let known = state.lock().unwrap().balances.contains_key(&id);
    if known {
        Ok(Json(json!({ "active": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
