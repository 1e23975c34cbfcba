//! In-memory balance provider for testing
//!
//! Balances, transactions and reachability are scripted per account.
//! Adjustments are recorded; balances only change through `set_balance`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AdjustmentReceipt, BalanceProvider};
use crate::error::{Error, Result};
use crate::models::TransactionRecord;

#[derive(Default)]
struct MockState {
    balances: HashMap<String, f64>,
    transactions: HashMap<String, Vec<TransactionRecord>>,
    inactive: HashSet<String>,
    adjustments: Vec<(String, f64, String)>,
    fail_adjustments: bool,
    fail_transactions: bool,
}

/// Mock provider; clones share state
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<RwLock<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Set an account's balance, making it known and active
    pub fn set_balance(&self, external_ref: &str, balance: f64) {
        self.write().balances.insert(external_ref.to_string(), balance);
    }

    pub fn push_transaction(&self, external_ref: &str, amount: f64, created_at: DateTime<Utc>) {
        self.write()
            .transactions
            .entry(external_ref.to_string())
            .or_default()
            .push(TransactionRecord { amount, created_at });
    }

    /// Mark an account inactive at the provider
    pub fn deactivate(&self, external_ref: &str) {
        self.write().inactive.insert(external_ref.to_string());
    }

    /// Make every adjustment call fail
    pub fn fail_adjustments(&self, fail: bool) {
        self.write().fail_adjustments = fail;
    }

    /// Make every transaction fetch fail
    pub fn fail_transactions(&self, fail: bool) {
        self.write().fail_transactions = fail;
    }

    /// Adjustments received, as `(external_ref, amount, description)`
    pub fn adjustments(&self) -> Vec<(String, f64, String)> {
        self.read().adjustments.clone()
    }
}

#[async_trait]
impl BalanceProvider for MockProvider {
    async fn get_balance(&self, external_ref: &str) -> Result<f64> {
        self.read()
            .balances
            .get(external_ref)
            .copied()
            .ok_or_else(|| Error::ExternalUnavailable(format!("unknown account {}", external_ref)))
    }

    async fn get_transactions(
        &self,
        external_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        let state = self.read();
        if state.fail_transactions {
            return Err(Error::ExternalUnavailable(
                "transaction listing failed".to_string(),
            ));
        }
        Ok(state
            .transactions
            .get(external_ref)
            .map(|txns| {
                txns.iter()
                    .filter(|t| t.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_adjustment(
        &self,
        external_ref: &str,
        amount: f64,
        description: &str,
    ) -> Result<AdjustmentReceipt> {
        let mut state = self.write();
        if state.fail_adjustments {
            return Err(Error::ExternalUnavailable(
                "provider rejected adjustment".to_string(),
            ));
        }
        state
            .adjustments
            .push((external_ref.to_string(), amount, description.to_string()));
        let id = format!("adj_{}", state.adjustments.len());
        Ok(AdjustmentReceipt {
            id: Some(id),
            amount,
            description: description.to_string(),
        })
    }

    async fn verify_reachable(&self, external_ref: &str) -> bool {
        let state = self.read();
        state.balances.contains_key(external_ref) && !state.inactive.contains(external_ref)
    }

    fn host(&self) -> &str {
        "mock"
    }
}
