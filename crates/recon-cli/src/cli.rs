//! CLI argument definitions using clap
//!
//! Command implementations live in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Recon - Balance reconciliation with learned auto-adjustment
#[derive(Parser)]
#[command(name = "recon")]
#[command(about = "Reconcile local balances against an external provider", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "recon.db", global = true)]
    pub db: PathBuf,

    /// Config file (defaults to ~/.local/share/recon/config/recon.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and model directory
    Init,

    /// List or register accounts
    Accounts {
        #[command(subcommand)]
        action: Option<AccountsAction>,
    },

    /// Reconcile one account, or every account
    Reconcile {
        /// Account ID to reconcile
        #[arg(short, long, conflicts_with = "all")]
        account: Option<i64>,

        /// Reconcile every account
        #[arg(long)]
        all: bool,

        /// Correct any discrepancy without consulting the model, resolving
        /// held outcomes (requires --account)
        #[arg(long, requires = "account")]
        manual: bool,
    },

    /// Show an account's reconciliation history
    History {
        /// Account ID
        account_id: i64,

        /// Number of outcomes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the most recent outcomes across all accounts
    Status,

    /// Show current signals for an account without reconciling it
    Insights {
        /// Account ID
        account_id: i64,
    },

    /// Train the model from completed reconciliations
    Train,

    /// Retrain only if enough new completed reconciliations arrived
    Retrain {
        /// Window length in hours (defaults to the scheduler interval)
        #[arg(long)]
        hours: Option<u64>,

        /// Minimum completed reconciliations in the window
        #[arg(long)]
        min_new: Option<usize>,
    },

    /// Show model readiness and last training metrics
    Model,

    /// Evaluate the auto-adjust policy for given signals
    Policy {
        /// Predicted difference
        #[arg(long, allow_hyphen_values = true)]
        predicted: f64,

        /// Confidence score in [0, 1]
        #[arg(long)]
        confidence: f64,

        /// Risk tier: low, medium, high
        #[arg(long, default_value = "medium")]
        risk: String,

        /// Treat the account as anomalous
        #[arg(long)]
        anomaly: bool,
    },

    /// Show the most recent feedback log entries
    Feedback {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        #[arg(long)]
        no_auth: bool,

        /// Don't run scheduled reconciliation and retraining
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[derive(Subcommand)]
pub enum AccountsAction {
    /// List all accounts
    List,

    /// Register an account
    Add {
        /// Identifier of the account at the provider
        #[arg(long)]
        external_ref: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Current local balance
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        balance: f64,
    },
}
