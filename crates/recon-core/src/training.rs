//! Training pipeline
//!
//! Completed reconciliation outcomes are the labels. Each one is paired with
//! the feature vector the engine saw at the time: the one logged as feedback
//! when the attempt ran, or else one rebuilt from the account's state as of
//! the outcome's creation.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::Database;
use crate::engine::{extract, fit, AccountSnapshot, DiscrepancyModel, FeatureVector, TrainingParams};
use crate::error::{DataShortfall, Error, Result};
use crate::models::{ReconciliationOutcome, ReconciliationStatus, TrainingMetrics, TransactionRecord};
use crate::provider::{BalanceProvider, ProviderClient};
use crate::store::ModelStore;

/// Longest accepted retraining window, in hours (ten years)
pub const MAX_WINDOW_HOURS: u64 = 24 * 366 * 10;

/// Start of a retraining window of `hours` ending at `now`
pub fn window_start(now: DateTime<Utc>, hours: u64) -> Result<DateTime<Utc>> {
    let out_of_range = || {
        Error::InvalidData(format!(
            "Retraining window of {} hours is out of range (max {})",
            hours, MAX_WINDOW_HOURS
        ))
    };
    if hours > MAX_WINDOW_HOURS {
        return Err(out_of_range());
    }
    let span = i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .ok_or_else(out_of_range)?;
    now.checked_sub_signed(span).ok_or_else(out_of_range)
}

/// Summary of a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub metrics: TrainingMetrics,
    /// Completed outcomes considered
    pub outcomes: usize,
    /// Examples whose features came from the feedback log
    pub from_feedback: usize,
    /// Examples rebuilt from account history
    pub reconstructed: usize,
    /// Outcomes that yielded no features
    pub discarded: usize,
}

/// Result of a scheduled retraining check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrainOutcome {
    /// Too few new completed outcomes since the window started
    Skipped { recent: usize },
    Trained(TrainingReport),
    Failed { reason: String },
}

/// Builds training examples from outcomes and installs the fitted model
pub struct TrainingPipeline<'a> {
    db: &'a Database,
    provider: &'a ProviderClient,
    model: &'a DiscrepancyModel,
    store: &'a dyn ModelStore,
    params: TrainingParams,
    history_window: usize,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(
        db: &'a Database,
        provider: &'a ProviderClient,
        model: &'a DiscrepancyModel,
        store: &'a dyn ModelStore,
        params: TrainingParams,
        history_window: usize,
    ) -> Self {
        Self {
            db,
            provider,
            model,
            store,
            params,
            history_window,
        }
    }

    /// Train on every completed outcome.
    ///
    /// The model is saved before it is installed, so a failed save leaves
    /// the running model untouched.
    pub async fn train_from_history(&self) -> Result<TrainingReport> {
        let required = self.params.min_examples;
        let outcomes = self
            .db
            .list_reconciliations_by_status(ReconciliationStatus::Completed)?;
        if outcomes.len() < required {
            warn!(found = outcomes.len(), required, "Not enough completed reconciliations to train");
            return Err(Error::InsufficientData(DataShortfall::NoOutcomes {
                found: outcomes.len(),
                required,
            }));
        }

        let logged = self.logged_features();
        let mut examples = Vec::with_capacity(outcomes.len());
        let mut pending = Vec::new();
        for outcome in &outcomes {
            match logged.get(&outcome.id) {
                Some(features) => examples.push((*features, outcome.difference)),
                None => pending.push(outcome),
            }
        }
        let from_feedback = examples.len();

        let rebuilt = self.reconstruct(&pending).await?;
        let reconstructed = rebuilt.len();
        examples.extend(rebuilt);
        let discarded = outcomes.len() - examples.len();

        if examples.len() < required {
            warn!(
                usable = examples.len(),
                discarded, required, "Too few usable training examples"
            );
            return Err(Error::InsufficientData(DataShortfall::UnusableOutcomes {
                usable: examples.len(),
                required,
            }));
        }

        let model = fit(&examples, &self.params, Utc::now())?;
        let metrics = model.metrics.clone();
        self.store.save(&model)?;
        self.model.install(model);

        info!(
            training_samples = metrics.training_samples,
            from_feedback,
            reconstructed,
            discarded,
            mae = metrics.mean_absolute_error,
            r2 = metrics.r2_score,
            "Model trained from reconciliation history"
        );

        Ok(TrainingReport {
            metrics,
            outcomes: outcomes.len(),
            from_feedback,
            reconstructed,
            discarded,
        })
    }

    /// Retrain only when at least `min_new` completed outcomes were created
    /// at or after `since`
    pub async fn retrain_if_due(&self, since: DateTime<Utc>, min_new: usize) -> RetrainOutcome {
        let recent = match self
            .db
            .count_reconciliations_since(ReconciliationStatus::Completed, since)
        {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Failed to count recent reconciliations: {}", e);
                return RetrainOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if recent < min_new {
            info!(recent, min_new, "Retraining skipped");
            return RetrainOutcome::Skipped { recent };
        }

        info!(recent, "Retraining model");
        match self.train_from_history().await {
            Ok(report) => RetrainOutcome::Trained(report),
            Err(e) => {
                warn!("Retraining failed: {}", e);
                RetrainOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Features logged at reconciliation time, by reconciliation ID
    fn logged_features(&self) -> HashMap<i64, FeatureVector> {
        match self.store.read_feedback() {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.reconciliation_id, r.features))
                .collect(),
            Err(e) => {
                warn!("Feedback log unavailable, rebuilding all features: {}", e);
                HashMap::new()
            }
        }
    }

    /// Rebuild features for outcomes as of their creation time.
    ///
    /// Transactions are fetched once per account. Outcomes whose account no
    /// longer exists are dropped.
    async fn reconstruct(
        &self,
        outcomes: &[&ReconciliationOutcome],
    ) -> Result<Vec<(FeatureVector, f64)>> {
        let mut by_account: HashMap<i64, Vec<&ReconciliationOutcome>> = HashMap::new();
        for outcome in outcomes {
            by_account.entry(outcome.account_id).or_default().push(outcome);
        }

        let mut examples = Vec::with_capacity(outcomes.len());
        for (account_id, outcomes) in by_account {
            let Some(account) = self.db.get_account(account_id)? else {
                warn!(account_id, dropped = outcomes.len(), "Account missing, dropping its outcomes");
                continue;
            };

            let earliest = outcomes
                .iter()
                .map(|o| o.created_at)
                .min()
                .unwrap_or_else(Utc::now);
            let transactions = self
                .fetch_transactions(&account.external_ref, earliest - Duration::hours(24))
                .await;

            for outcome in outcomes {
                let at = outcome.created_at;
                let recent_differences = self
                    .db
                    .list_reconciliations_before(account_id, at, self.history_window)?
                    .iter()
                    .map(|r| r.difference)
                    .collect();
                let snapshot = AccountSnapshot {
                    last_sync: account.last_sync.filter(|sync| *sync <= at),
                    recent_differences,
                };
                let features = extract(&snapshot, &transactions, at);
                if features.to_array().iter().all(|v| v.is_finite()) {
                    examples.push((features, outcome.difference));
                }
            }
        }
        Ok(examples)
    }

    async fn fetch_transactions(&self, external_ref: &str, since: DateTime<Utc>) -> Vec<TransactionRecord> {
        match self.provider.get_transactions(external_ref, since).await {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(external_ref, "Failed to fetch transactions for training: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AttemptResolution;
    use crate::models::{FeedbackRecord, NewAccount, NewReconciliation};
    use crate::provider::MockProvider;
    use crate::store::MemoryModelStore;
    use chrono::TimeZone;

    struct Fixture {
        db: Database,
        provider: ProviderClient,
        model: DiscrepancyModel,
        store: MemoryModelStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                db: Database::in_memory().unwrap(),
                provider: ProviderClient::Mock(MockProvider::new()),
                model: DiscrepancyModel::untrained(),
                store: MemoryModelStore::new(),
            }
        }

        fn pipeline(&self) -> TrainingPipeline<'_> {
            let params = TrainingParams {
                n_estimators: 10,
                ..Default::default()
            };
            TrainingPipeline::new(&self.db, &self.provider, &self.model, &self.store, params, 100)
        }

        fn account(&self, external_ref: &str) -> i64 {
            self.db
                .create_account(&NewAccount {
                    external_ref: external_ref.to_string(),
                    name: external_ref.to_string(),
                    current_balance: 500.0,
                })
                .unwrap()
                .id
        }

        /// Record `n` outcomes an hour apart with the given resolution
        fn outcomes(&self, account_id: i64, n: usize, resolution: AttemptResolution) -> Vec<i64> {
            (0..n)
                .map(|i| {
                    let at = base() + Duration::hours(i as i64);
                    let new = NewReconciliation::automatic(account_id, 500.0, 500.0 - (i % 7) as f64);
                    self.db.record_attempt(&new, &resolution, at).unwrap().id
                })
                .collect()
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_no_outcomes_gate() {
        let f = Fixture::new();
        let account = f.account("acc_1");
        f.outcomes(account, 49, AttemptResolution::Settled);
        // Held outcomes are not labels
        f.outcomes(account, 10, AttemptResolution::Held { reason: "review".into() });

        let err = f.pipeline().train_from_history().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientData(DataShortfall::NoOutcomes { found: 49, required: 50 })
        ));
        assert!(!f.model.is_trained());
    }

    #[tokio::test]
    async fn test_trains_on_fifty_reconstructed() {
        let f = Fixture::new();
        let account = f.account("acc_1");
        f.outcomes(account, 50, AttemptResolution::Settled);

        let report = f.pipeline().train_from_history().await.unwrap();
        assert_eq!(report.metrics.training_samples, 50);
        assert_eq!(report.reconstructed, 50);
        assert_eq!(report.from_feedback, 0);
        assert_eq!(report.discarded, 0);

        assert!(f.model.is_trained());
        assert!(f.store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_feedback_features_preferred() {
        let f = Fixture::new();
        let account = f.account("acc_1");
        let ids = f.outcomes(account, 50, AttemptResolution::Settled);

        for &id in &ids[..20] {
            f.store
                .append_feedback(&FeedbackRecord {
                    timestamp: base(),
                    account_id: account,
                    reconciliation_id: id,
                    features: FeatureVector {
                        txn_count_last_day: 3.0,
                        ..Default::default()
                    },
                    actual_difference: 1.0,
                    adjustment_success: false,
                })
                .unwrap();
        }

        let report = f.pipeline().train_from_history().await.unwrap();
        assert_eq!(report.from_feedback, 20);
        assert_eq!(report.reconstructed, 30);
    }

    #[tokio::test]
    async fn test_unusable_outcomes_gate() {
        let f = Fixture::new();
        let kept = f.account("acc_1");
        let gone = f.account("acc_2");
        f.outcomes(kept, 30, AttemptResolution::Settled);
        f.outcomes(gone, 30, AttemptResolution::Settled);

        {
            let conn = f.db.conn().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
            conn.execute("DELETE FROM accounts WHERE id = ?", [gone]).unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        }

        let err = f.pipeline().train_from_history().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientData(DataShortfall::UnusableOutcomes { usable: 30, required: 50 })
        ));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_running_model() {
        let f = Fixture {
            store: MemoryModelStore::failing(),
            ..Fixture::new()
        };
        let account = f.account("acc_1");
        f.outcomes(account, 50, AttemptResolution::Settled);

        assert!(matches!(
            f.pipeline().train_from_history().await,
            Err(Error::Persistence(_))
        ));
        assert!(!f.model.is_trained());
    }

    #[tokio::test]
    async fn test_retrain_skipped_below_minimum() {
        let f = Fixture::new();
        let account = f.account("acc_1");
        f.outcomes(account, 60, AttemptResolution::Settled);

        // Only the last five fall inside the window
        let since = base() + Duration::hours(55);
        let outcome = f.pipeline().retrain_if_due(since, 10).await;
        assert_eq!(outcome, RetrainOutcome::Skipped { recent: 5 });
        assert!(!f.model.is_trained());

        let outcome = f.pipeline().retrain_if_due(base(), 10).await;
        assert!(matches!(outcome, RetrainOutcome::Trained(ref r) if r.outcomes == 60));
        assert!(f.model.is_trained());
    }

    #[test]
    fn test_window_start_bounds() {
        assert_eq!(window_start(base(), 24).unwrap(), base() - Duration::hours(24));
        assert_eq!(window_start(base(), 0).unwrap(), base());
        assert!(window_start(base(), MAX_WINDOW_HOURS).is_ok());
        assert!(matches!(
            window_start(base(), MAX_WINDOW_HOURS + 1),
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            window_start(base(), 3_000_000_000_000_000),
            Err(Error::InvalidData(_))
        ));
        assert!(window_start(base(), u64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_retrain_reports_shortfall() {
        let f = Fixture::new();
        let account = f.account("acc_1");
        f.outcomes(account, 20, AttemptResolution::Settled);

        match f.pipeline().retrain_if_due(base(), 10).await {
            RetrainOutcome::Failed { reason } => assert!(reason.contains("only 20")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
