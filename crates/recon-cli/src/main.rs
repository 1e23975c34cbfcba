//! Recon CLI - Balance reconciliation with learned auto-adjustment
//!
//! Usage:
//!   recon init                     Initialize database
//!   recon accounts add ...         Register an account
//!   recon reconcile --all          Reconcile every account
//!   recon reconcile -a 1 --manual  Correct account 1 without the model gate
//!   recon train                    Train the discrepancy model
//!   recon serve --port 3000        Start web server with scheduled jobs

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    if let Commands::Init = cli.command {
        return commands::cmd_init(&cli.db, &config);
    }

    let service = commands::open_service(&cli.db, config)?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Accounts { action } => match action {
            None | Some(AccountsAction::List) => commands::cmd_accounts_list(&service),
            Some(AccountsAction::Add {
                external_ref,
                name,
                balance,
            }) => commands::cmd_accounts_add(&service, &external_ref, &name, balance),
        },
        Commands::Reconcile {
            account,
            all,
            manual,
        } => match (account, all) {
            (Some(id), _) if manual => commands::cmd_reconcile_manual(&service, id).await,
            (Some(id), _) => commands::cmd_reconcile_account(&service, id).await,
            (None, true) => commands::cmd_reconcile_all(&service).await,
            (None, false) => {
                anyhow::bail!("Specify --account <ID> or --all")
            }
        },
        Commands::History { account_id, limit } => {
            commands::cmd_history(&service, account_id, limit)
        }
        Commands::Status => commands::cmd_status(&service),
        Commands::Insights { account_id } => commands::cmd_insights(&service, account_id).await,
        Commands::Train => commands::cmd_train(&service).await,
        Commands::Retrain { hours, min_new } => {
            commands::cmd_retrain(&service, hours, min_new).await
        }
        Commands::Model => commands::cmd_model_status(&service),
        Commands::Policy {
            predicted,
            confidence,
            risk,
            anomaly,
        } => commands::cmd_policy(&service, predicted, confidence, &risk, anomaly),
        Commands::Feedback { limit } => commands::cmd_feedback(&service, limit),
        Commands::Serve {
            port,
            host,
            no_auth,
            no_scheduler,
        } => commands::cmd_serve(service, &host, port, no_auth, no_scheduler).await,
    }
}
