//! Background jobs for scheduled reconciliation and retraining
//!
//! A [`JobController`] owns the tasks it spawns. `start` launches:
//!
//! - a reconciliation ticker over every account
//! - a one-shot check that trains the model if none is loaded yet
//! - a retraining ticker that only retrains when enough new completed
//!   outcomes arrived during the last interval
//!
//! `stop` signals every task and waits for them to end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant};
use tracing::{error, info, warn};

use recon_core::config::SchedulerConfig;
use recon_core::training::MAX_WINDOW_HOURS;
use recon_core::{ReconciliationService, RetrainOutcome};

/// Owns the scheduled job tasks for one service
pub struct JobController {
    service: Arc<ReconciliationService>,
    config: SchedulerConfig,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobController {
    pub fn new(service: Arc<ReconciliationService>, config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            config,
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn the job tasks. Calling `start` on a running controller does
    /// nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Job controller already running");
            return;
        }
        self.shutdown.send_replace(false);

        info!(
            reconcile_every_secs = self.config.reconciliation_interval_secs,
            retrain_every_hours = self.config.training_interval_hours,
            min_new = self.config.min_new_reconciliations,
            "Starting job controller"
        );

        self.tasks.push(self.spawn_reconciliation());
        self.tasks.push(self.spawn_initial_training());
        self.tasks.push(self.spawn_retraining());
    }

    /// Signal every task to stop and wait for them
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!("Job controller stopped");
    }

    fn spawn_reconciliation(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_secs(self.config.reconciliation_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            // Skip the first immediate tick - wait a full interval after startup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_reconciliation(&service).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_initial_training(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let mut shutdown = self.shutdown.subscribe();
        let delay = Duration::from_secs(self.config.initial_training_delay_secs);

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    run_initial_training(&service).await;
                }
                _ = shutdown.changed() => {}
            }
        })
    }

    fn spawn_retraining(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let config = self.config.clone();
        let mut shutdown = self.shutdown.subscribe();
        let first = Instant::now() + Duration::from_secs(config.first_retraining_delay_secs);
        let period =
            Duration::from_secs(config.training_interval_hours.clamp(1, MAX_WINDOW_HOURS) * 3600);

        tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_retraining(&service, &config).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Run one scheduled reconciliation pass
pub async fn run_reconciliation(service: &ReconciliationService) {
    info!("Running scheduled reconciliation...");
    match service.reconcile_all_accounts().await {
        Ok(results) => {
            let failed = results.iter().filter(|r| !r.success).count();
            info!(
                accounts = results.len(),
                failed, "Scheduled reconciliation completed"
            );
        }
        Err(e) => error!("Scheduled reconciliation failed: {}", e),
    }
}

/// Train once if no model is loaded. Returns whether training ran and
/// succeeded.
pub async fn run_initial_training(service: &ReconciliationService) -> bool {
    if service.model().is_trained() {
        info!("Trained model already loaded, skipping initial training");
        return false;
    }

    info!("No trained model, running initial training...");
    match service.train_model().await {
        Ok(report) => {
            info!(
                training_samples = report.metrics.training_samples,
                "Initial training completed"
            );
            true
        }
        Err(e) => {
            warn!("Initial training failed: {}", e);
            false
        }
    }
}

/// Retrain if enough completed outcomes arrived during the last interval
pub async fn run_retraining(
    service: &ReconciliationService,
    config: &SchedulerConfig,
) -> RetrainOutcome {
    let outcome = service
        .retrain_recent(config.training_interval_hours, config.min_new_reconciliations)
        .await
        .unwrap_or_else(|e| RetrainOutcome::Failed {
            reason: e.to_string(),
        });

    match &outcome {
        RetrainOutcome::Trained(report) => info!(
            mae = report.metrics.mean_absolute_error,
            r2 = report.metrics.r2_score,
            training_samples = report.metrics.training_samples,
            "Scheduled retraining completed"
        ),
        RetrainOutcome::Skipped { recent } => info!(
            recent,
            min_new = config.min_new_reconciliations,
            "Scheduled retraining skipped"
        ),
        RetrainOutcome::Failed { reason } => error!("Scheduled retraining failed: {}", reason),
    }
    outcome
}
