//! Decision engine for automatic-adjustment eligibility
//!
//! - `features` - Fixed-order feature vectors from account state and transactions
//! - `scaler` / `forest` / `isolation` - Model building blocks
//! - `model` - Trained model state, training and the shared model handle
//! - `confidence` - Prediction confidence from relative error
//! - `risk` - Additive account risk tiers
//! - `policy` - Per-tier auto-adjust thresholds and hold reasons

pub mod confidence;
pub mod features;
pub mod forest;
pub mod isolation;
pub mod model;
pub mod policy;
pub mod risk;
pub mod scaler;

pub use confidence::confidence;
pub use features::{extract, AccountSnapshot, FeatureVector, FEATURE_COUNT};
pub use model::{
    fit, DiscrepancyModel, ModelSchema, ModelState, TrainedModel, TrainingParams,
    MODEL_SCHEMA_VERSION,
};
pub use policy::{
    evaluate, should_auto_adjust, thresholds, thresholds_for_label, HoldReason, PolicyDecision,
    TierThresholds,
};
pub use risk::{risk, risk_points, RiskInputs};
