//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (load_config, open_db, open_service)
//! - `accounts` - Account listing, registration and history
//! - `reconcile` - Single and bulk reconciliation, recent status
//! - `model` - Insights, training, model status, policy and feedback
//! - `serve` - Web server command

pub mod accounts;
pub mod core;
pub mod model;
pub mod reconcile;
pub mod serve;

// Re-export command functions for main.rs
pub use accounts::*;
pub use core::*;
pub use model::*;
pub use reconcile::*;
pub use serve::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
