//! Domain models for Recon

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::FeatureVector;

/// A locally tracked account mirrored at the external provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Identifier of this account at the balance provider
    pub external_ref: String,
    pub name: String,
    pub current_balance: f64,
    /// Time of the last successful reconciliation adjustment
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to register an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub external_ref: String,
    pub name: String,
    #[serde(default)]
    pub current_balance: f64,
}

/// A transaction as reported by the provider. Never persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Held for manual review
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed outcomes never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown reconciliation status: {}", s)),
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an outcome was produced by the engine or by an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationType {
    #[default]
    Automatic,
    Manual,
}

impl ReconciliationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ReconciliationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "automatic" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown reconciliation type: {}", s)),
        }
    }
}

impl std::fmt::Display for ReconciliationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted reconciliation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub id: i64,
    pub account_id: i64,
    pub local_balance: f64,
    pub external_balance: f64,
    /// `local_balance - external_balance`, rounded to cents
    pub difference: f64,
    pub status: ReconciliationStatus,
    #[serde(rename = "type")]
    pub reconciliation_type: ReconciliationType,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Observed balances for a new attempt
#[derive(Debug, Clone)]
pub struct NewReconciliation {
    pub account_id: i64,
    pub local_balance: f64,
    pub external_balance: f64,
    pub difference: f64,
    pub reconciliation_type: ReconciliationType,
}

impl NewReconciliation {
    pub fn automatic(account_id: i64, local_balance: f64, external_balance: f64) -> Self {
        Self {
            account_id,
            local_balance,
            external_balance,
            difference: round_cents(local_balance - external_balance),
            reconciliation_type: ReconciliationType::Automatic,
        }
    }

    pub fn manual(account_id: i64, local_balance: f64, external_balance: f64) -> Self {
        Self {
            reconciliation_type: ReconciliationType::Manual,
            ..Self::automatic(account_id, local_balance, external_balance)
        }
    }
}

/// A correction written to the provider and recorded locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub id: i64,
    pub reconciliation_id: i64,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Coarse account risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signals produced for one reconciliation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsights {
    pub predicted_difference: f64,
    pub confidence_score: f64,
    pub is_anomaly: bool,
    pub risk_level: RiskLevel,
    pub auto_adjust_recommended: bool,
    /// Absolute error between the predicted and observed difference
    pub prediction_accuracy: f64,
}

/// Read-only view of an account's current signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInsights {
    pub account_id: i64,
    pub predicted_difference: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub risk_level: RiskLevel,
    pub model_trained: bool,
    pub historical_avg_difference: f64,
    pub reconciliation_count: usize,
}

/// One line of the append-only feedback log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub timestamp: DateTime<Utc>,
    pub account_id: i64,
    pub reconciliation_id: i64,
    pub features: FeatureVector,
    pub actual_difference: f64,
    pub adjustment_success: bool,
}

/// Evaluation of a training run on the held-out split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub mean_absolute_error: f64,
    pub r2_score: f64,
    pub training_samples: usize,
    pub test_samples: usize,
}

/// Summary of the model currently in use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub trained: bool,
    /// Feature names in the order the model consumes them
    pub features: Vec<String>,
    /// Where the model is persisted
    pub location: String,
    pub metrics: Option<TrainingMetrics>,
    pub trained_at: Option<DateTime<Utc>>,
}

/// Result of reconciling one account, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub account_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReconciliationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<AiInsights>,
}

impl ReconcileResult {
    /// Report a persisted attempt. A failed outcome is unsuccessful and
    /// carries its error message.
    pub fn from_attempt(outcome: ReconciliationOutcome, insights: AiInsights) -> Self {
        Self {
            insights: Some(insights),
            ..Self::from_outcome(outcome)
        }
    }

    /// Report a persisted attempt that was not scored by the model
    pub fn from_outcome(outcome: ReconciliationOutcome) -> Self {
        let failed = outcome.status == ReconciliationStatus::Failed;
        Self {
            account_id: outcome.account_id,
            success: !failed,
            error: if failed { outcome.error_message } else { None },
            reconciliation_id: Some(outcome.id),
            status: Some(outcome.status),
            insights: None,
        }
    }

    pub fn failure(account_id: i64, error: impl Into<String>) -> Self {
        Self {
            account_id,
            success: false,
            error: Some(error.into()),
            reconciliation_id: None,
            status: None,
            insights: None,
        }
    }
}

/// Round a currency amount to two decimal places
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
