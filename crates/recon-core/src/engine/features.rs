//! Feature extraction for the discrepancy model.
//!
//! Training and inference both go through [`FeatureVector`], so the field
//! order a model was fitted on is the order it is scored with. The order is
//! recorded in the persisted model and checked on load.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TransactionRecord;

/// Number of features in a [`FeatureVector`]
pub const FEATURE_COUNT: usize = 9;

/// Hours assumed since the last sync when an account has never synced
const DEFAULT_HOURS_SINCE_SYNC: f64 = 24.0;

/// Model input for one account at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub hour_of_day: f64,
    /// Monday = 0
    pub day_of_week: f64,
    pub day_of_month: f64,
    pub txn_count_last_hour: f64,
    pub txn_count_last_day: f64,
    pub avg_txn_amount: f64,
    /// Sample standard deviation of the last day's amounts
    pub balance_volatility: f64,
    pub hours_since_last_sync: f64,
    pub historical_difference_mean: f64,
}

impl FeatureVector {
    /// Field names in positional order
    pub const NAMES: [&'static str; FEATURE_COUNT] = [
        "hour_of_day",
        "day_of_week",
        "day_of_month",
        "txn_count_last_hour",
        "txn_count_last_day",
        "avg_txn_amount",
        "balance_volatility",
        "hours_since_last_sync",
        "historical_difference_mean",
    ];

    pub fn feature_names() -> Vec<String> {
        Self::NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Positional form, ordered as [`FeatureVector::NAMES`]
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.hour_of_day,
            self.day_of_week,
            self.day_of_month,
            self.txn_count_last_hour,
            self.txn_count_last_day,
            self.avg_txn_amount,
            self.balance_volatility,
            self.hours_since_last_sync,
            self.historical_difference_mean,
        ]
    }

    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        let [hour_of_day, day_of_week, day_of_month, txn_count_last_hour, txn_count_last_day, avg_txn_amount, balance_volatility, hours_since_last_sync, historical_difference_mean] =
            values;
        Self {
            hour_of_day,
            day_of_week,
            day_of_month,
            txn_count_last_hour,
            txn_count_last_day,
            avg_txn_amount,
            balance_volatility,
            hours_since_last_sync,
            historical_difference_mean,
        }
    }
}

/// What the extractor needs to know about an account
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub last_sync: Option<DateTime<Utc>>,
    /// Differences of the most recent reconciliations, newest first
    pub recent_differences: Vec<f64>,
}

/// Build the feature vector for an account as of `now`.
///
/// Only transactions in `(now - 24h, now]` count toward the daily figures
/// and `(now - 1h, now]` toward the hourly count. A `last_sync` later than
/// `now` is treated as absent.
pub fn extract(
    snapshot: &AccountSnapshot,
    transactions: &[TransactionRecord],
    now: DateTime<Utc>,
) -> FeatureVector {
    let day_ago = now - Duration::hours(24);
    let hour_ago = now - Duration::hours(1);

    let last_day: Vec<&TransactionRecord> = transactions
        .iter()
        .filter(|t| t.created_at > day_ago && t.created_at <= now)
        .collect();
    let last_hour = last_day.iter().filter(|t| t.created_at > hour_ago).count();

    let amounts: Vec<f64> = last_day.iter().map(|t| t.amount).collect();
    let (avg_txn_amount, balance_volatility) = if amounts.len() >= 2 {
        (mean(&amounts), sample_std(&amounts))
    } else {
        (0.0, 0.0)
    };

    let hours_since_last_sync = match snapshot.last_sync {
        Some(sync) if sync <= now => (now - sync).num_seconds() as f64 / 3600.0,
        _ => DEFAULT_HOURS_SINCE_SYNC,
    };

    FeatureVector {
        hour_of_day: now.hour() as f64,
        day_of_week: now.weekday().num_days_from_monday() as f64,
        day_of_month: now.day() as f64,
        txn_count_last_hour: last_hour as f64,
        txn_count_last_day: last_day.len() as f64,
        avg_txn_amount,
        balance_volatility,
        hours_since_last_sync,
        historical_difference_mean: mean(&snapshot.recent_differences),
    }
}

/// Arithmetic mean, 0 for an empty slice
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n - 1) standard deviation, 0 when fewer than two values
pub(crate) fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // Wednesday
        Utc.with_ymd_and_hms(2024, 5, 15, 14, 30, 0).unwrap()
    }

    fn txn(amount: f64, minutes_ago: i64) -> TransactionRecord {
        TransactionRecord {
            amount,
            created_at: now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_names_match_array_order() {
        let v = FeatureVector {
            hour_of_day: 1.0,
            day_of_week: 2.0,
            day_of_month: 3.0,
            txn_count_last_hour: 4.0,
            txn_count_last_day: 5.0,
            avg_txn_amount: 6.0,
            balance_volatility: 7.0,
            hours_since_last_sync: 8.0,
            historical_difference_mean: 9.0,
        };
        assert_eq!(
            v.to_array(),
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
        );
        assert_eq!(FeatureVector::from_array(v.to_array()), v);

        // serialized keys are exactly the feature names
        let json = serde_json::to_value(v).unwrap();
        let keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        let mut expected = FeatureVector::NAMES.to_vec();
        expected.sort();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_calendar_features() {
        let v = extract(&AccountSnapshot::default(), &[], now());
        assert_eq!(v.hour_of_day, 14.0);
        assert_eq!(v.day_of_week, 2.0);
        assert_eq!(v.day_of_month, 15.0);
    }

    #[test]
    fn test_transaction_windows() {
        let txns = vec![
            txn(10.0, 30),        // last hour
            txn(20.0, 90),        // last day
            txn(30.0, 60 * 23),   // last day
            txn(500.0, 60 * 25),  // too old
            txn(999.0, -10),      // in the future
        ];
        let v = extract(&AccountSnapshot::default(), &txns, now());

        assert_eq!(v.txn_count_last_hour, 1.0);
        assert_eq!(v.txn_count_last_day, 3.0);
        assert_eq!(v.avg_txn_amount, 20.0);
        assert!((v.balance_volatility - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_transaction_has_zero_stats() {
        let v = extract(&AccountSnapshot::default(), &[txn(42.0, 5)], now());
        assert_eq!(v.txn_count_last_day, 1.0);
        assert_eq!(v.avg_txn_amount, 0.0);
        assert_eq!(v.balance_volatility, 0.0);
    }

    #[test]
    fn test_sync_and_history_defaults() {
        let v = extract(&AccountSnapshot::default(), &[], now());
        assert_eq!(v.hours_since_last_sync, 24.0);
        assert_eq!(v.historical_difference_mean, 0.0);

        let snapshot = AccountSnapshot {
            last_sync: Some(now() - Duration::minutes(90)),
            recent_differences: vec![2.0, -4.0, 5.0],
        };
        let v = extract(&snapshot, &[], now());
        assert_eq!(v.hours_since_last_sync, 1.5);
        assert_eq!(v.historical_difference_mean, 1.0);

        let future_sync = AccountSnapshot {
            last_sync: Some(now() + Duration::hours(2)),
            recent_differences: vec![],
        };
        assert_eq!(extract(&future_sync, &[], now()).hours_since_last_sync, 24.0);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let snapshot = AccountSnapshot {
            last_sync: Some(now() - Duration::hours(5)),
            recent_differences: vec![1.25, 3.5],
        };
        let txns = vec![txn(12.5, 10), txn(-3.0, 200), txn(7.75, 700)];

        let first = extract(&snapshot, &txns, now());
        for _ in 0..10 {
            assert_eq!(extract(&snapshot, &txns, now()), first);
        }
    }
}
