//! Account command implementations (list, add, history)

use anyhow::{Context, Result};

use recon_core::models::{NewAccount, ReconciliationOutcome};
use recon_core::ReconciliationService;

use super::truncate;

pub fn cmd_accounts_list(service: &ReconciliationService) -> Result<()> {
    let accounts = service.list_accounts()?;

    if accounts.is_empty() {
        println!("No accounts registered. Add one with 'recon accounts add'.");
        return Ok(());
    }

    println!();
    println!(
        "   {:>4}  {:<16}  {:<24}  {:>12}  {}",
        "ID", "External ref", "Name", "Balance", "Last sync"
    );
    println!("   ─────────────────────────────────────────────────────────────────────────────");
    for account in &accounts {
        let last_sync = account
            .last_sync
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {:>4}  {:<16}  {:<24}  {:>12.2}  {}",
            account.id,
            truncate(&account.external_ref, 16),
            truncate(&account.name, 24),
            account.current_balance,
            last_sync
        );
    }
    println!();
    println!("   {} account(s)", accounts.len());

    Ok(())
}

pub fn cmd_accounts_add(
    service: &ReconciliationService,
    external_ref: &str,
    name: &str,
    balance: f64,
) -> Result<()> {
    if external_ref.trim().is_empty() {
        anyhow::bail!("--external-ref must not be empty");
    }
    if name.trim().is_empty() {
        anyhow::bail!("--name must not be empty");
    }

    let account = service
        .create_account(&NewAccount {
            external_ref: external_ref.trim().to_string(),
            name: name.trim().to_string(),
            current_balance: balance,
        })
        .context("Failed to create account")?;

    println!(
        "✅ Registered account {} ({}) with balance {:.2}",
        account.id, account.external_ref, account.current_balance
    );
    Ok(())
}

pub fn cmd_history(service: &ReconciliationService, account_id: i64, limit: usize) -> Result<()> {
    let outcomes = service.account_history(account_id, limit)?;

    if outcomes.is_empty() {
        println!("No reconciliations yet for account {}.", account_id);
        return Ok(());
    }

    println!();
    print_outcomes(&outcomes);

    let adjustments = service.account_adjustments(account_id)?;
    if !adjustments.is_empty() {
        println!();
        println!("   Adjustments:");
        for a in &adjustments {
            println!(
                "   {:>5}  {}  {:>10.2}  {}",
                a.reconciliation_id,
                a.created_at.format("%Y-%m-%d %H:%M:%S"),
                a.amount,
                truncate(&a.description, 60)
            );
        }
    }
    Ok(())
}

/// Print outcomes as a table, one row each
pub(crate) fn print_outcomes(outcomes: &[ReconciliationOutcome]) {
    println!(
        "   {:>5}  {:>7}  {:<19}  {:>12}  {:>12}  {:>10}  {:<11}  {}",
        "ID", "Account", "Created", "Local", "External", "Diff", "Status", "Note"
    );
    println!("   ──────────────────────────────────────────────────────────────────────────────────────────────");
    for o in outcomes {
        println!(
            "   {:>5}  {:>7}  {:<19}  {:>12.2}  {:>12.2}  {:>10.2}  {:<11}  {}",
            o.id,
            o.account_id,
            o.created_at.format("%Y-%m-%d %H:%M:%S"),
            o.local_balance,
            o.external_balance,
            o.difference,
            o.status.as_str(),
            truncate(o.error_message.as_deref().unwrap_or(""), 48)
        );
    }
}
