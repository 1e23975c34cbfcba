//! Reconciliation orchestration
//!
//! One attempt per account: check the provider can see the account, read
//! both balances, score the discrepancy with the current model and either
//! settle, adjust or hold the outcome for manual review. Every attempt is
//! persisted in one database transaction and then logged as feedback for
//! future training.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::ReconConfig;
use crate::db::{AttemptResolution, Database};
use crate::engine::features::{mean, sample_std};
use crate::engine::{
    confidence, evaluate, extract, risk, thresholds, thresholds_for_label, AccountSnapshot,
    DiscrepancyModel, FeatureVector, ModelState, PolicyDecision, TrainingParams,
};
use crate::error::{Error, Result};
use crate::models::{
    Account, AccountInsights, AdjustmentRecord, AiInsights, FeedbackRecord, ModelStatus, NewAccount,
    NewReconciliation, ReconcileResult, ReconciliationOutcome, ReconciliationStatus, RiskLevel,
    TransactionRecord,
};
use crate::provider::{BalanceProvider, ProviderClient};
use crate::store::ModelStore;
use crate::training::{window_start, RetrainOutcome, TrainingPipeline, TrainingReport};

/// Outcomes shown by the status overview
const STATUS_OVERVIEW_LIMIT: usize = 10;

/// Everything known about an account at one point in time
#[derive(Debug, Clone)]
pub struct AccountPatterns {
    pub account: Account,
    /// Most recent outcomes, newest first
    pub history: Vec<ReconciliationOutcome>,
    /// Provider transactions over the lookback window
    pub transactions: Vec<TransactionRecord>,
}

impl AccountPatterns {
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            last_sync: self.account.last_sync,
            recent_differences: self.history.iter().map(|r| r.difference).collect(),
        }
    }

    /// Signed mean of historical differences
    pub fn avg_difference(&self) -> f64 {
        let differences: Vec<f64> = self.history.iter().map(|r| r.difference).collect();
        mean(&differences)
    }

    pub fn risk_level(&self) -> RiskLevel {
        let amounts: Vec<f64> = self.transactions.iter().map(|t| t.amount).collect();
        risk(
            self.account.current_balance,
            self.avg_difference().abs(),
            self.transactions.len(),
            sample_std(&amounts),
        )
    }
}

/// What-if input for the auto-adjust policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyQuery {
    pub predicted_difference: f64,
    pub confidence: f64,
    #[serde(default)]
    pub is_anomaly: bool,
    /// Tier label; unknown labels use medium's thresholds
    pub risk_level: String,
}

/// Releases an account's in-flight claim when the attempt ends
struct InFlight<'a> {
    accounts: &'a Mutex<HashSet<i64>>,
    account_id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.remove(&self.account_id);
    }
}

/// Reconciles accounts against the provider using the shared model
pub struct ReconciliationService {
    db: Database,
    provider: ProviderClient,
    model: Arc<DiscrepancyModel>,
    store: Arc<dyn ModelStore>,
    config: ReconConfig,
    in_flight: Mutex<HashSet<i64>>,
    /// Held across fit, save and install so runs never interleave
    training_lock: tokio::sync::Mutex<()>,
}

impl ReconciliationService {
    /// Create the service, loading a previously saved model if there is one.
    /// A missing, unreadable or incompatible model leaves the service
    /// untrained.
    pub fn new(
        db: Database,
        provider: ProviderClient,
        store: Arc<dyn ModelStore>,
        config: ReconConfig,
    ) -> Self {
        let model = match store.load() {
            Ok(Some(trained)) => {
                info!(
                    location = %store.location(),
                    trained_at = %trained.trained_at,
                    "Loaded discrepancy model"
                );
                DiscrepancyModel::with_model(trained)
            }
            Ok(None) => {
                info!(location = %store.location(), "No saved model, starting untrained");
                DiscrepancyModel::untrained()
            }
            Err(e) => {
                warn!(location = %store.location(), "Ignoring saved model: {}", e);
                DiscrepancyModel::untrained()
            }
        };

        Self {
            db,
            provider,
            model: Arc::new(model),
            store,
            config,
            in_flight: Mutex::new(HashSet::new()),
            training_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<DiscrepancyModel> {
        &self.model
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    /// Training pipeline over this service's stores and model
    fn training(&self) -> TrainingPipeline<'_> {
        TrainingPipeline::new(
            &self.db,
            &self.provider,
            &self.model,
            self.store.as_ref(),
            TrainingParams::from(&self.config.model),
            self.config.reconciliation.history_window,
        )
    }

    fn claim(&self, account_id: i64) -> Result<InFlight<'_>> {
        let mut accounts = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !accounts.insert(account_id) {
            return Err(Error::InProgress(account_id));
        }
        Ok(InFlight {
            accounts: &self.in_flight,
            account_id,
        })
    }

    fn require_account(&self, account_id: i64) -> Result<Account> {
        self.db
            .get_account(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", account_id)))
    }

    /// Gather history, recent provider transactions and the account itself.
    ///
    /// A failed transaction fetch degrades to an empty list.
    pub async fn analyze_account_patterns(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AccountPatterns> {
        let account = self.require_account(account_id)?;
        self.patterns_for(account, now).await
    }

    async fn patterns_for(&self, account: Account, now: DateTime<Utc>) -> Result<AccountPatterns> {
        let history = self
            .db
            .list_reconciliations_for_account(account.id, self.config.reconciliation.history_window)?;

        let since = now - Duration::days(self.config.reconciliation.transaction_lookback_days);
        let transactions = match self
            .provider
            .get_transactions(&account.external_ref, since)
            .await
        {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(
                    account_id = account.id,
                    "Failed to fetch transactions, continuing without them: {}", e
                );
                Vec::new()
            }
        };

        Ok(AccountPatterns {
            account,
            history,
            transactions,
        })
    }

    /// Reconcile one account, reporting failures as a result value
    pub async fn reconcile_account(&self, account_id: i64) -> ReconcileResult {
        match self.try_reconcile_account(account_id).await {
            Ok((outcome, insights)) => ReconcileResult::from_attempt(outcome, insights),
            Err(e) => {
                error!(account_id, "Reconciliation failed: {}", e);
                ReconcileResult::failure(account_id, e.to_string())
            }
        }
    }

    /// Reconcile one account.
    ///
    /// Errors before an outcome is persisted (unknown account, unreachable
    /// provider, another attempt in flight) leave no trace in the database.
    pub async fn try_reconcile_account(
        &self,
        account_id: i64,
    ) -> Result<(ReconciliationOutcome, AiInsights)> {
        let _claim = self.claim(account_id)?;
        let account = self.require_account(account_id)?;
        let external_ref = account.external_ref.clone();
        self.ensure_reachable(&external_ref).await?;

        let now = Utc::now();
        let patterns = self.patterns_for(account, now).await?;
        let external_balance = self.fetch_balance(&external_ref).await?;

        let new = NewReconciliation::automatic(
            account_id,
            patterns.account.current_balance,
            external_balance,
        );
        let features = extract(&patterns.snapshot(), &patterns.transactions, now);
        let (insights, decision) = self.score(&features, new.difference, patterns.risk_level());

        debug!(
            account_id,
            difference = new.difference,
            predicted = insights.predicted_difference,
            confidence = insights.confidence_score,
            is_anomaly = insights.is_anomaly,
            risk_level = %insights.risk_level,
            "Scored discrepancy"
        );

        let resolution = if new.difference.abs() <= self.config.reconciliation.tolerance {
            AttemptResolution::Settled
        } else if decision.auto_adjust {
            let description = adjustment_description(now, &insights);
            self.apply_adjustment(&new, &external_ref, description).await
        } else {
            let reason = decision
                .hold_reason
                .map(|r| r.describe())
                .unwrap_or("policy withheld automation");
            warn!(
                account_id,
                hold_reason = ?decision.hold_reason,
                "Automatic adjustment withheld, holding for manual review"
            );
            AttemptResolution::Held {
                reason: format!("Held for manual review: {}", reason),
            }
        };

        let outcome = self.persist_attempt(&new, &resolution, now)?;
        let adjusted = matches!(resolution, AttemptResolution::Adjusted { .. })
            && outcome.status == ReconciliationStatus::Completed;
        self.record_feedback(&outcome, features, adjusted);

        Ok((outcome, insights))
    }

    /// Operator-triggered reconciliation, reporting failures as a result
    /// value
    pub async fn reconcile_account_manual(&self, account_id: i64) -> ReconcileResult {
        match self.try_reconcile_account_manual(account_id).await {
            Ok(outcome) => ReconcileResult::from_outcome(outcome),
            Err(e) => {
                error!(account_id, "Manual reconciliation failed: {}", e);
                ReconcileResult::failure(account_id, e.to_string())
            }
        }
    }

    /// Operator-triggered reconciliation.
    ///
    /// Any discrepancy beyond tolerance is corrected at the provider without
    /// consulting the model. A completed manual attempt resolves the
    /// account's outcomes held for review.
    pub async fn try_reconcile_account_manual(
        &self,
        account_id: i64,
    ) -> Result<ReconciliationOutcome> {
        let _claim = self.claim(account_id)?;
        let account = self.require_account(account_id)?;
        let external_ref = account.external_ref.clone();
        self.ensure_reachable(&external_ref).await?;

        let now = Utc::now();
        let external_balance = self.fetch_balance(&external_ref).await?;
        let new = NewReconciliation::manual(account_id, account.current_balance, external_balance);

        let resolution = if new.difference.abs() <= self.config.reconciliation.tolerance {
            AttemptResolution::Settled
        } else {
            let description = format!(
                "Manual reconciliation adjustment - {}",
                now.format("%Y-%m-%d %H:%M:%S")
            );
            self.apply_adjustment(&new, &external_ref, description).await
        };

        let outcome = self.persist_attempt(&new, &resolution, now)?;
        if outcome.status == ReconciliationStatus::Completed {
            self.resolve_held(account_id, outcome.id);
        }
        Ok(outcome)
    }

    async fn ensure_reachable(&self, external_ref: &str) -> Result<()> {
        if self.provider.verify_reachable(external_ref).await {
            return Ok(());
        }
        Err(Error::ExternalUnavailable(format!(
            "account {} is not reachable at {}",
            external_ref,
            self.provider.host()
        )))
    }

    async fn fetch_balance(&self, external_ref: &str) -> Result<f64> {
        self.provider
            .get_balance(external_ref)
            .await
            .map_err(|e| match e {
                Error::ExternalUnavailable(_) => e,
                other => Error::ExternalUnavailable(format!("balance lookup failed: {}", other)),
            })
    }

    /// Send the correction for `new` to the provider
    async fn apply_adjustment(
        &self,
        new: &NewReconciliation,
        external_ref: &str,
        description: String,
    ) -> AttemptResolution {
        match self
            .provider
            .create_adjustment(external_ref, new.difference, &description)
            .await
        {
            Ok(_) => AttemptResolution::Adjusted {
                amount: new.difference,
                description,
                external_balance: new.external_balance,
            },
            Err(e) => {
                error!(account_id = new.account_id, "Provider rejected adjustment: {}", e);
                AttemptResolution::Failed {
                    error: Error::Adjustment(e.to_string()).to_string(),
                }
            }
        }
    }

    /// Record the attempt. When bookkeeping for an applied adjustment fails,
    /// the attempt is recorded as failed instead.
    fn persist_attempt(
        &self,
        new: &NewReconciliation,
        resolution: &AttemptResolution,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome> {
        let outcome = match self.db.record_attempt(new, resolution, now) {
            Ok(outcome) => outcome,
            Err(e) if matches!(resolution, AttemptResolution::Adjusted { .. }) => {
                // The provider already applied the adjustment; record the
                // attempt as failed so an operator can reconcile by hand
                error!(account_id = new.account_id, "Failed to record adjustment: {}", e);
                self.db.record_attempt(
                    new,
                    &AttemptResolution::Failed {
                        error: Error::Adjustment(format!("local bookkeeping failed: {}", e))
                            .to_string(),
                    },
                    now,
                )?
            }
            Err(e) => return Err(e),
        };

        info!(
            account_id = new.account_id,
            reconciliation_id = outcome.id,
            kind = %outcome.reconciliation_type,
            status = %outcome.status,
            difference = outcome.difference,
            "Reconciliation recorded"
        );
        Ok(outcome)
    }

    /// Complete the account's held outcomes after a manual reconciliation
    fn resolve_held(&self, account_id: i64, resolved_by: i64) -> usize {
        let held = match self
            .db
            .list_reconciliations_by_status(ReconciliationStatus::Pending)
        {
            Ok(held) => held,
            Err(e) => {
                warn!(account_id, "Failed to list held reconciliations: {}", e);
                return 0;
            }
        };

        let note = format!("Resolved by manual reconciliation {}", resolved_by);
        let mut resolved = 0;
        for outcome in held.iter().filter(|o| o.account_id == account_id) {
            match self.db.update_reconciliation_status(
                outcome.id,
                ReconciliationStatus::Completed,
                Some(&note),
            ) {
                Ok(()) => resolved += 1,
                Err(e) => warn!(
                    account_id,
                    reconciliation_id = outcome.id,
                    "Failed to resolve held reconciliation: {}", e
                ),
            }
        }
        if resolved > 0 {
            info!(account_id, resolved, resolved_by, "Resolved held reconciliations");
        }
        resolved
    }

    /// Score one vector against a single model snapshot
    fn score(
        &self,
        features: &FeatureVector,
        actual_difference: f64,
        risk_level: RiskLevel,
    ) -> (AiInsights, PolicyDecision) {
        let model = self.model.snapshot();
        let predicted_difference = model.predict(features);
        let is_anomaly = model.is_anomaly(features);
        let confidence_score = confidence(predicted_difference, actual_difference);
        let decision = evaluate(
            predicted_difference,
            confidence_score,
            is_anomaly,
            thresholds(risk_level),
        );

        let insights = AiInsights {
            predicted_difference,
            confidence_score,
            is_anomaly,
            risk_level,
            auto_adjust_recommended: decision.auto_adjust,
            prediction_accuracy: (predicted_difference - actual_difference).abs(),
        };
        (insights, decision)
    }

    fn record_feedback(&self, outcome: &ReconciliationOutcome, features: FeatureVector, adjusted: bool) {
        let record = FeedbackRecord {
            timestamp: outcome.created_at,
            account_id: outcome.account_id,
            reconciliation_id: outcome.id,
            features,
            actual_difference: outcome.difference,
            adjustment_success: adjusted,
        };
        if let Err(e) = self.store.append_feedback(&record) {
            warn!(
                account_id = outcome.account_id,
                reconciliation_id = outcome.id,
                "Failed to append feedback: {}", e
            );
        }
    }

    /// Reconcile every account in turn
    pub async fn reconcile_all_accounts(&self) -> Result<Vec<ReconcileResult>> {
        let accounts = self.db.list_accounts()?;
        info!(accounts = accounts.len(), "Reconciling all accounts");

        let mut results = Vec::with_capacity(accounts.len());
        for account in accounts {
            results.push(self.reconcile_account(account.id).await);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            succeeded = results.len() - failed,
            failed, "Reconciliation run finished"
        );
        Ok(results)
    }

    /// Current signals for an account without reconciling it
    pub async fn get_insights(&self, account_id: i64) -> Result<AccountInsights> {
        let now = Utc::now();
        let patterns = self.analyze_account_patterns(account_id, now).await?;
        let features = extract(&patterns.snapshot(), &patterns.transactions, now);

        let model = self.model.snapshot();
        Ok(AccountInsights {
            account_id,
            predicted_difference: model.predict(&features),
            is_anomaly: model.is_anomaly(&features),
            anomaly_score: model.anomaly_score(&features),
            risk_level: patterns.risk_level(),
            model_trained: model.is_trained(),
            historical_avg_difference: patterns.avg_difference(),
            reconciliation_count: patterns.history.len(),
        })
    }

    /// Train from completed outcomes and install the new model
    pub async fn train_model(&self) -> Result<TrainingReport> {
        let _running = self.training_lock.lock().await;
        self.training().train_from_history().await
    }

    /// Retrain when enough completed outcomes arrived since `since`
    pub async fn retrain_if_due(&self, since: DateTime<Utc>, min_new: usize) -> RetrainOutcome {
        let _running = self.training_lock.lock().await;
        self.training().retrain_if_due(since, min_new).await
    }

    /// Retrain when at least `min_new` completed outcomes arrived in the
    /// last `hours`. Out-of-range windows are rejected.
    pub async fn retrain_recent(&self, hours: u64, min_new: usize) -> Result<RetrainOutcome> {
        let since = window_start(Utc::now(), hours)?;
        Ok(self.retrain_if_due(since, min_new).await)
    }

    pub fn model_status(&self) -> ModelStatus {
        let state = self.model.snapshot();
        let (metrics, trained_at) = match state.as_ref() {
            ModelState::Trained(model) => (Some(model.metrics.clone()), Some(model.trained_at)),
            ModelState::Untrained => (None, None),
        };
        ModelStatus {
            trained: state.is_trained(),
            features: FeatureVector::feature_names(),
            location: self.store.location(),
            metrics,
            trained_at,
        }
    }

    /// Evaluate the auto-adjust policy for caller-supplied signals
    pub fn evaluate_policy(&self, query: &PolicyQuery) -> PolicyDecision {
        evaluate(
            query.predicted_difference,
            query.confidence,
            query.is_anomaly,
            thresholds_for_label(&query.risk_level),
        )
    }

    /// Most recent outcomes across all accounts
    pub fn reconciliation_status(&self) -> Result<Vec<ReconciliationOutcome>> {
        self.db.list_recent_reconciliations(STATUS_OVERVIEW_LIMIT)
    }

    /// An account's outcomes, newest first
    pub fn account_history(&self, account_id: i64, limit: usize) -> Result<Vec<ReconciliationOutcome>> {
        self.require_account(account_id)?;
        self.db.list_reconciliations_for_account(account_id, limit)
    }

    /// Adjustments applied to an account, newest first
    pub fn account_adjustments(&self, account_id: i64) -> Result<Vec<AdjustmentRecord>> {
        self.require_account(account_id)?;
        self.db.list_adjustments_for_account(account_id)
    }

    pub fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let created = self.db.create_account(account)?;
        info!(account_id = created.id, external_ref = %created.external_ref, "Account created");
        Ok(created)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.db.list_accounts()
    }

    pub fn read_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        self.store.read_feedback()
    }
}

/// Provider-facing description of an automatic adjustment
fn adjustment_description(now: DateTime<Utc>, insights: &AiInsights) -> String {
    format!(
        "Automatic reconciliation adjustment - {} | confidence: {:.2} | predicted: {:.2} | risk: {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        insights.confidence_score,
        insights.predicted_difference,
        insights.risk_level
    )
}
