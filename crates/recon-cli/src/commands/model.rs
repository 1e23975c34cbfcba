//! Model command implementations (insights, train, retrain, model, policy, feedback)

use anyhow::{Context, Result};

use recon_core::models::TrainingMetrics;
use recon_core::{PolicyQuery, ReconciliationService, RetrainOutcome};

pub async fn cmd_insights(service: &ReconciliationService, account_id: i64) -> Result<()> {
    let insights = service
        .get_insights(account_id)
        .await
        .context("Failed to compute insights")?;

    println!();
    println!("🔎 Insights for account {}", account_id);
    println!("   ─────────────────────────────");
    println!(
        "   Model:                {}",
        if insights.model_trained { "trained" } else { "untrained" }
    );
    println!("   Predicted difference: {:.2}", insights.predicted_difference);
    println!(
        "   Anomaly:              {} (score {:.3})",
        if insights.is_anomaly { "yes" } else { "no" },
        insights.anomaly_score
    );
    println!("   Risk level:           {}", insights.risk_level);
    println!(
        "   Avg past difference:  {:.2}",
        insights.historical_avg_difference
    );
    println!("   Past reconciliations: {}", insights.reconciliation_count);
    println!();
    Ok(())
}

pub async fn cmd_train(service: &ReconciliationService) -> Result<()> {
    println!("🧠 Training discrepancy model from completed reconciliations...");

    let report = service.train_model().await.context("Training failed")?;

    println!(
        "   Examples: {} from feedback, {} reconstructed, {} discarded",
        report.from_feedback, report.reconstructed, report.discarded
    );
    print_metrics(&report.metrics);
    println!("✅ Model trained and saved");
    Ok(())
}

pub async fn cmd_retrain(
    service: &ReconciliationService,
    hours: Option<u64>,
    min_new: Option<usize>,
) -> Result<()> {
    let defaults = &service.config().scheduler;
    let hours = hours.unwrap_or(defaults.training_interval_hours);
    let min_new = min_new.unwrap_or(defaults.min_new_reconciliations);
    let outcome = service
        .retrain_recent(hours, min_new)
        .await
        .context("Invalid retraining window")?;

    match outcome {
        RetrainOutcome::Trained(report) => {
            print_metrics(&report.metrics);
            println!("✅ Model retrained");
            Ok(())
        }
        RetrainOutcome::Skipped { recent } => {
            println!(
                "⏭️  Skipped: {} completed reconciliation(s) in the last {}h, need {}",
                recent, hours, min_new
            );
            Ok(())
        }
        RetrainOutcome::Failed { reason } => anyhow::bail!("Retraining failed: {}", reason),
    }
}

pub fn cmd_model_status(service: &ReconciliationService) -> Result<()> {
    let status = service.model_status();

    println!();
    println!("🧠 Discrepancy Model");
    println!("   ─────────────────────────────");
    println!(
        "   Status:   {}",
        if status.trained { "trained" } else { "untrained" }
    );
    println!("   Location: {}", status.location);
    if let Some(at) = status.trained_at {
        println!("   Trained:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("   Features: {}", status.features.join(", "));
    if let Some(metrics) = &status.metrics {
        print_metrics(metrics);
    }
    println!();
    Ok(())
}

pub fn cmd_policy(
    service: &ReconciliationService,
    predicted: f64,
    confidence: f64,
    risk: &str,
    anomaly: bool,
) -> Result<()> {
    let decision = service.evaluate_policy(&PolicyQuery {
        predicted_difference: predicted,
        confidence,
        is_anomaly: anomaly,
        risk_level: risk.to_string(),
    });

    println!(
        "   Thresholds: confidence >= {:.2}, |amount| <= {:.2}",
        decision.thresholds.min_confidence, decision.thresholds.max_abs_amount
    );
    match decision.hold_reason {
        None => println!("✅ Auto-adjust"),
        Some(reason) => println!("⏸️  Hold: {}", reason.describe()),
    }
    Ok(())
}

pub fn cmd_feedback(service: &ReconciliationService, limit: usize) -> Result<()> {
    let records = service.read_feedback().context("Failed to read feedback log")?;

    if records.is_empty() {
        println!("Feedback log is empty.");
        return Ok(());
    }

    let skip = records.len().saturating_sub(limit);
    for record in &records[skip..] {
        println!(
            "{}",
            serde_json::to_string(record).context("Failed to format feedback record")?
        );
    }
    println!();
    println!("   showing {} of {} record(s)", records.len() - skip, records.len());
    Ok(())
}

fn print_metrics(metrics: &TrainingMetrics) {
    println!(
        "   MAE: {:.4} | R²: {:.4} | train/test: {}/{}",
        metrics.mean_absolute_error,
        metrics.r2_score,
        metrics.training_samples,
        metrics.test_samples
    );
}
