//! Reconciliation command implementations

use anyhow::Result;

use recon_core::models::{ReconcileResult, ReconciliationStatus};
use recon_core::ReconciliationService;

use super::accounts::print_outcomes;

pub async fn cmd_reconcile_account(service: &ReconciliationService, account_id: i64) -> Result<()> {
    println!("🔄 Reconciling account {}...", account_id);

    let result = service.reconcile_account(account_id).await;
    print_result(&result);

    if !result.success {
        anyhow::bail!(
            "Reconciliation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn cmd_reconcile_manual(service: &ReconciliationService, account_id: i64) -> Result<()> {
    println!("🛠️  Manually reconciling account {}...", account_id);

    let result = service.reconcile_account_manual(account_id).await;
    print_result(&result);

    if !result.success {
        anyhow::bail!(
            "Manual reconciliation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn cmd_reconcile_all(service: &ReconciliationService) -> Result<()> {
    println!("🔄 Reconciling all accounts...");

    let results = service.reconcile_all_accounts().await?;
    if results.is_empty() {
        println!("No accounts registered.");
        return Ok(());
    }

    for result in &results {
        print_result(result);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    println!();
    println!(
        "📊 {} reconciled, {} failed",
        results.len() - failed,
        failed
    );
    Ok(())
}

pub fn cmd_status(service: &ReconciliationService) -> Result<()> {
    let outcomes = service.reconciliation_status()?;

    println!();
    println!("📊 Recent Reconciliations");
    println!(
        "   Model: {}",
        if service.model().is_trained() {
            "trained"
        } else {
            "untrained (no automatic adjustments)"
        }
    );
    println!();

    if outcomes.is_empty() {
        println!("   No reconciliations yet.");
        return Ok(());
    }
    print_outcomes(&outcomes);
    Ok(())
}

fn print_result(result: &ReconcileResult) {
    let label = match (result.success, result.status) {
        (false, _) => "❌ failed",
        (true, Some(ReconciliationStatus::Pending)) => "⏸️  held for review",
        (true, _) => "✅ completed",
    };
    println!("   Account {}: {}", result.account_id, label);

    if let Some(error) = &result.error {
        println!("      {}", error);
    }
    if let Some(insights) = &result.insights {
        println!(
            "      predicted {:.2} | confidence {:.2} | risk {} | anomaly {} | auto-adjust {}",
            insights.predicted_difference,
            insights.confidence_score,
            insights.risk_level,
            if insights.is_anomaly { "yes" } else { "no" },
            if insights.auto_adjust_recommended { "yes" } else { "no" }
        );
    }
}
