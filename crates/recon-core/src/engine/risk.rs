//! Account risk classification
//!
//! Additive points over four account characteristics. The cut-offs are
//! fixed policy constants.

use crate::models::RiskLevel;

/// Inputs to [`risk`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskInputs {
    pub balance: f64,
    /// `|mean|` of the account's historical reconciliation differences
    pub avg_abs_historical_difference: f64,
    pub transaction_count: usize,
    /// Sample standard deviation of recent transaction amounts
    pub volatility: f64,
}

fn tiered(value: f64, high: f64, medium: f64) -> u32 {
    if value > high {
        2
    } else if value > medium {
        1
    } else {
        0
    }
}

/// Total risk points for an account
pub fn risk_points(inputs: &RiskInputs) -> u32 {
    let mut points = tiered(inputs.balance, 10_000.0, 1_000.0);
    points += tiered(inputs.avg_abs_historical_difference, 100.0, 10.0);
    points += tiered(inputs.volatility, 500.0, 100.0);
    if inputs.transaction_count > 100 {
        points += 1;
    }
    points
}

pub fn risk(
    balance: f64,
    avg_abs_historical_difference: f64,
    transaction_count: usize,
    volatility: f64,
) -> RiskLevel {
    let points = risk_points(&RiskInputs {
        balance,
        avg_abs_historical_difference,
        transaction_count,
        volatility,
    });
    match points {
        p if p >= 5 => RiskLevel::High,
        p if p >= 3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}
