//! Auto-adjust policy
//!
//! Higher-risk accounts need both a more confident prediction and a smaller
//! correction before an adjustment is applied without review.

use serde::{Deserialize, Serialize};

use crate::models::RiskLevel;

/// Per-tier requirements for automatic adjustment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub min_confidence: f64,
    pub max_abs_amount: f64,
}

pub fn thresholds(level: RiskLevel) -> TierThresholds {
    match level {
        RiskLevel::Low => TierThresholds {
            min_confidence: 0.70,
            max_abs_amount: 100.0,
        },
        RiskLevel::Medium => TierThresholds {
            min_confidence: 0.80,
            max_abs_amount: 50.0,
        },
        RiskLevel::High => TierThresholds {
            min_confidence: 0.90,
            max_abs_amount: 20.0,
        },
    }
}

/// Thresholds for a tier given as text; unknown labels get medium's
pub fn thresholds_for_label(label: &str) -> TierThresholds {
    thresholds(label.parse().unwrap_or(RiskLevel::Medium))
}

/// Why automation was withheld
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    Anomaly,
    LowConfidence,
    AmountExceedsCeiling,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::LowConfidence => "low_confidence",
            Self::AmountExceedsCeiling => "amount_exceeds_ceiling",
        }
    }

    /// Operator-facing explanation stored on held outcomes
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Anomaly => "anomalous account pattern detected",
            Self::LowConfidence => "prediction confidence below the tier minimum",
            Self::AmountExceedsCeiling => "predicted correction exceeds the tier ceiling",
        }
    }
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of evaluating the policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub auto_adjust: bool,
    pub hold_reason: Option<HoldReason>,
    pub thresholds: TierThresholds,
}

/// Evaluate the policy, reporting the first reason automation is withheld
pub fn evaluate(
    predicted_difference: f64,
    confidence: f64,
    is_anomaly: bool,
    thresholds: TierThresholds,
) -> PolicyDecision {
    // NaN fails both comparisons
    let confident = confidence >= thresholds.min_confidence;
    let within_ceiling = predicted_difference.abs() <= thresholds.max_abs_amount;

    let hold_reason = if is_anomaly {
        Some(HoldReason::Anomaly)
    } else if !confident {
        Some(HoldReason::LowConfidence)
    } else if !within_ceiling {
        Some(HoldReason::AmountExceedsCeiling)
    } else {
        None
    };

    PolicyDecision {
        auto_adjust: hold_reason.is_none(),
        hold_reason,
        thresholds,
    }
}

pub fn should_auto_adjust(
    predicted_difference: f64,
    confidence: f64,
    is_anomaly: bool,
    risk_level: RiskLevel,
) -> bool {
    evaluate(
        predicted_difference,
        confidence,
        is_anomaly,
        thresholds(risk_level),
    )
    .auto_adjust
}
