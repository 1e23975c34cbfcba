//! External balance provider
//!
//! The provider is the source of truth for balances. The engine reads
//! balances and recent transactions from it, checks that an account is
//! reachable before reconciling, and writes corrective adjustments to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::TransactionRecord;

mod http;
mod mock;

pub use http::HttpProvider;
pub use mock::MockProvider;

/// Provider acknowledgement of an adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentReceipt {
    /// Provider-side identifier, when the provider returns one
    #[serde(default)]
    pub id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

/// Capabilities the reconciliation engine needs from a balance provider
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Current balance of an account
    async fn get_balance(&self, external_ref: &str) -> Result<f64>;

    /// Transactions created on or after `since`
    async fn get_transactions(
        &self,
        external_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>>;

    /// Apply a balance adjustment
    async fn create_adjustment(
        &self,
        external_ref: &str,
        amount: f64,
        description: &str,
    ) -> Result<AdjustmentReceipt>;

    /// Whether the account exists and is active. Transport failures
    /// report `false`.
    async fn verify_reachable(&self, external_ref: &str) -> bool;

    /// Provider location (for logging)
    fn host(&self) -> &str;
}

/// Concrete provider client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum ProviderClient {
    /// Provider REST API
    Http(HttpProvider),
    /// In-memory provider for tests and local runs
    Mock(MockProvider),
}

impl ProviderClient {
    /// Build the HTTP client from config. Returns `None` when no base URL
    /// is configured.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        match &config.base_url {
            Some(url) => Ok(Some(ProviderClient::Http(HttpProvider::new(
                url,
                config.api_key.as_deref(),
                std::time::Duration::from_secs(config.timeout_secs),
            )?))),
            None => Ok(None),
        }
    }

    /// Create a mock provider
    pub fn mock() -> Self {
        ProviderClient::Mock(MockProvider::new())
    }
}

// Implement BalanceProvider for ProviderClient by delegating to the inner client
#[async_trait]
impl BalanceProvider for ProviderClient {
    async fn get_balance(&self, external_ref: &str) -> Result<f64> {
        match self {
            ProviderClient::Http(p) => p.get_balance(external_ref).await,
            ProviderClient::Mock(p) => p.get_balance(external_ref).await,
        }
    }

    async fn get_transactions(
        &self,
        external_ref: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        match self {
            ProviderClient::Http(p) => p.get_transactions(external_ref, since).await,
            ProviderClient::Mock(p) => p.get_transactions(external_ref, since).await,
        }
    }

    async fn create_adjustment(
        &self,
        external_ref: &str,
        amount: f64,
        description: &str,
    ) -> Result<AdjustmentReceipt> {
        match self {
            ProviderClient::Http(p) => p.create_adjustment(external_ref, amount, description).await,
            ProviderClient::Mock(p) => p.create_adjustment(external_ref, amount, description).await,
        }
    }

    async fn verify_reachable(&self, external_ref: &str) -> bool {
        match self {
            ProviderClient::Http(p) => p.verify_reachable(external_ref).await,
            ProviderClient::Mock(p) => p.verify_reachable(external_ref).await,
        }
    }

    fn host(&self) -> &str {
        match self {
            ProviderClient::Http(p) => p.host(),
            ProviderClient::Mock(p) => p.host(),
        }
    }
}
