//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `load_config` - Resolve config from file and environment
//! - `open_db` - Open the database
//! - `open_service` - Wire the database, provider and model store together
//! - `cmd_init` - Initialize the database and model directory

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use recon_core::{
    Database, FileModelStore, ProviderClient, ReconConfig, ReconciliationService,
};

pub fn load_config(path: Option<&Path>) -> Result<ReconConfig> {
    ReconConfig::load(path).context("Failed to load config")
}

pub fn open_db(db_path: &Path) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    Database::new(path_str).context("Failed to open database")
}

/// Build the provider from config, falling back to an empty in-memory
/// provider when no URL is set
pub fn provider_from_config(config: &ReconConfig) -> Result<ProviderClient> {
    match ProviderClient::from_config(&config.provider).context("Invalid provider config")? {
        Some(provider) => Ok(provider),
        None => {
            warn!("No provider URL configured (set RECON_PROVIDER_URL); using an empty mock provider");
            Ok(ProviderClient::mock())
        }
    }
}

pub fn open_service(db_path: &Path, config: ReconConfig) -> Result<ReconciliationService> {
    let db = open_db(db_path)?;
    let provider = provider_from_config(&config)?;
    let store = FileModelStore::new(config.model.resolved_model_dir())
        .context("Failed to open model directory")?;
    Ok(ReconciliationService::new(
        db,
        provider,
        Arc::new(store),
        config,
    ))
}

pub fn cmd_init(db_path: &Path, config: &ReconConfig) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path)?;

    let model_dir = config.model.resolved_model_dir();
    FileModelStore::new(&model_dir).context("Failed to create model directory")?;
    println!("   Model directory: {}", model_dir.display());

    match &config.provider.base_url {
        Some(url) => println!("   Provider: {}", url),
        None => println!("   ⚠️  Provider: not configured (set RECON_PROVIDER_URL)"),
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Register an account: recon accounts add --external-ref acc_1 --name Operating");
    println!("  2. Reconcile: recon reconcile --all");
    println!("  3. Start the server with scheduled jobs: recon serve");

    Ok(())
}
