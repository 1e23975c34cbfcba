//! Server command implementation

use std::sync::Arc;

use anyhow::Result;

use recon_core::{BalanceProvider, ReconciliationService};

pub async fn cmd_serve(
    service: ReconciliationService,
    host: &str,
    port: u16,
    no_auth: bool,
    no_scheduler: bool,
) -> Result<()> {
    println!("🚀 Starting Recon web server...");
    println!("   Database: {}", service.db().path());
    println!("   Provider: {}", service.provider().host());
    println!("   Listening: http://{}:{}", host, port);

    let mut config = recon_server::ServerConfig::from_env();
    config.require_auth = !no_auth;

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if config.api_keys.is_empty() {
        println!("   ❌ No API keys configured - set RECON_API_KEYS or use --no-auth");
    } else {
        println!(
            "   🔑 API keys: {} configured (RECON_API_KEYS)",
            config.api_keys.len()
        );
    }

    let scheduler = if no_scheduler {
        println!("   ⏸️  Scheduled jobs disabled (--no-scheduler)");
        None
    } else {
        let sched = service.config().scheduler.clone();
        println!(
            "   ⏱️  Reconcile every {}s, retrain check every {}h (min {} new)",
            sched.reconciliation_interval_secs,
            sched.training_interval_hours,
            sched.min_new_reconciliations
        );
        Some(sched)
    };

    println!();
    println!("   Press Ctrl+C to stop");

    recon_server::serve(Arc::new(service), host, port, config, scheduler).await
}
