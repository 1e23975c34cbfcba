//! Recon Core Library
//!
//! Balance reconciliation with a learned decision engine:
//! - Database access and migrations for accounts, outcomes and adjustments
//! - External balance provider clients (HTTP and in-memory)
//! - Feature extraction, discrepancy prediction and anomaly detection
//! - Confidence scoring, risk classification and the auto-adjust policy
//! - Reconciliation orchestration and the training pipeline
//! - Durable model storage with schema validation and a feedback log

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod training;

/// Test utilities including mock provider server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::ReconConfig;
pub use db::Database;
pub use engine::{
    confidence, risk, should_auto_adjust, DiscrepancyModel, FeatureVector, ModelSchema,
    ModelState, PolicyDecision, TrainedModel,
};
pub use error::{DataShortfall, Error, Result};
pub use provider::{BalanceProvider, HttpProvider, MockProvider, ProviderClient};
pub use reconcile::{AccountPatterns, PolicyQuery, ReconciliationService};
pub use store::{FileModelStore, MemoryModelStore, ModelStore};
pub use training::{RetrainOutcome, TrainingPipeline, TrainingReport};
