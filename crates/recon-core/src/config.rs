//! Configuration for reconciliation, model training, the provider and jobs
//!
//! Resolution order:
//! 1. Environment variables (`RECON_*`)
//! 2. Override file (explicit path, or `~/.local/share/recon/config/recon.toml`)
//! 3. Embedded defaults from `config/recon.toml`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::training::MAX_WINDOW_HOURS;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/recon.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReconConfig {
    pub reconciliation: ReconciliationConfig,
    pub model: ModelConfig,
    pub provider: ProviderConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub tolerance: f64,
    pub history_window: usize,
    pub transaction_lookback_days: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            history_window: 100,
            transaction_lookback_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `model.json` and `feedback.jsonl`
    pub model_dir: Option<PathBuf>,
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Expected share of anomalous vectors in the training data
    pub contamination: f64,
    pub test_fraction: f64,
    pub min_training_examples: usize,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            n_estimators: 100,
            max_depth: 16,
            contamination: 0.1,
            test_fraction: 0.2,
            min_training_examples: 50,
            seed: 42,
        }
    }
}

impl ModelConfig {
    /// Configured directory, falling back to the platform data directory
    pub fn resolved_model_dir(&self) -> PathBuf {
        match &self.model_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recon")
                .join("models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub reconciliation_interval_secs: u64,
    pub training_interval_hours: u64,
    /// Completed outcomes required since the last window before retraining
    pub min_new_reconciliations: usize,
    pub initial_training_delay_secs: u64,
    pub first_retraining_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval_secs: 3600,
            training_interval_hours: 24,
            min_new_reconciliations: 10,
            initial_training_delay_secs: 60,
            first_retraining_delay_secs: 300,
        }
    }
}

/// Get the default override config path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("recon").join("config").join("recon.toml"))
}

impl ReconConfig {
    /// Load config from the override file (or embedded defaults) and apply
    /// environment overrides
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let content = match override_path {
            Some(path) if path.exists() => read_config(path)?,
            Some(path) => {
                return Err(Error::NotFound(format!(
                    "Config file {} does not exist",
                    path.display()
                )))
            }
            None => match default_config_path() {
                Some(path) if path.exists() => read_config(&path)?,
                _ => DEFAULT_CONFIG.to_string(),
            },
        };

        let mut config = Self::parse(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse TOML content. Missing sections and keys keep their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::InvalidData(format!("Invalid config TOML: {}", e)))?;

        // Empty strings in the file mean "unset"
        config.provider.base_url = config.provider.base_url.filter(|s| !s.is_empty());
        config.provider.api_key = config.provider.api_key.filter(|s| !s.is_empty());
        config.model.model_dir = config
            .model
            .model_dir
            .filter(|p| !p.as_os_str().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Apply `RECON_*` overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RECON_PROVIDER_URL").filter(|s| !s.is_empty()) {
            debug!("Provider URL overridden from environment");
            self.provider.base_url = Some(url);
        }
        if let Some(key) = lookup("RECON_PROVIDER_API_KEY").filter(|s| !s.is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(dir) = lookup("RECON_MODEL_DIR").filter(|s| !s.is_empty()) {
            self.model.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = lookup("RECON_RECONCILIATION_INTERVAL_SECS") {
            self.scheduler.reconciliation_interval_secs =
                parse_env("RECON_RECONCILIATION_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("RECON_TRAINING_INTERVAL_HOURS") {
            self.scheduler.training_interval_hours = parse_env("RECON_TRAINING_INTERVAL_HOURS", &v)?;
        }
        if let Some(v) = lookup("RECON_MIN_NEW_RECONCILIATIONS") {
            self.scheduler.min_new_reconciliations =
                parse_env("RECON_MIN_NEW_RECONCILIATIONS", &v)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.model.test_fraction) || self.model.test_fraction == 0.0 {
            return Err(Error::InvalidData(format!(
                "model.test_fraction must be in (0, 1), got {}",
                self.model.test_fraction
            )));
        }
        if !(0.0..0.5).contains(&self.model.contamination) || self.model.contamination == 0.0 {
            return Err(Error::InvalidData(format!(
                "model.contamination must be in (0, 0.5), got {}",
                self.model.contamination
            )));
        }
        if self.model.n_estimators == 0 {
            return Err(Error::InvalidData(
                "model.n_estimators must be at least 1".to_string(),
            ));
        }
        if self.reconciliation.tolerance < 0.0 {
            return Err(Error::InvalidData(
                "reconciliation.tolerance must not be negative".to_string(),
            ));
        }
        if self.scheduler.reconciliation_interval_secs == 0
            || self.scheduler.training_interval_hours == 0
        {
            return Err(Error::InvalidData(
                "scheduler intervals must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.training_interval_hours > MAX_WINDOW_HOURS {
            return Err(Error::InvalidData(format!(
                "scheduler.training_interval_hours must be at most {}, got {}",
                MAX_WINDOW_HOURS, self.scheduler.training_interval_hours
            )));
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::InvalidData(format!("Failed to read config: {}", e)))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidData(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_embedded_config_matches_defaults() {
        let config = ReconConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, ReconConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = ReconConfig::parse(
            r#"
            [reconciliation]
            tolerance = 0.05

            [provider]
            base_url = "https://provider.test/v1"
            "#,
        )
        .unwrap();

        assert_eq!(config.reconciliation.tolerance, 0.05);
        assert_eq!(config.reconciliation.history_window, 100);
        assert_eq!(
            config.provider.base_url.as_deref(),
            Some("https://provider.test/v1")
        );
        assert_eq!(config.model.min_training_examples, 50);
    }

    #[test]
    fn test_env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("RECON_PROVIDER_URL", "http://localhost:9000"),
            ("RECON_TRAINING_INTERVAL_HOURS", "6"),
            ("RECON_MIN_NEW_RECONCILIATIONS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = ReconConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.provider.base_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(config.scheduler.training_interval_hours, 6);
        assert_eq!(config.scheduler.min_new_reconciliations, 3);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = ReconConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "RECON_RECONCILIATION_INTERVAL_SECS").then(|| "hourly".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_oversized_training_interval_rejected() {
        let mut config = ReconConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "RECON_TRAINING_INTERVAL_HOURS").then(|| "3000000000000000".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert!(ReconConfig::parse("[scheduler]\ntraining_interval_hours = 100000000").is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ReconConfig::parse("[model]\ntest_fraction = 1.5").is_err());
        assert!(ReconConfig::parse("[model]\ncontamination = 0.0").is_err());
        assert!(ReconConfig::parse("[reconciliation]\ntolerance = -1.0").is_err());
        assert!(ReconConfig::parse("not toml at all [").is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_not_found() {
        let result = ReconConfig::load(Some(Path::new("/nonexistent/recon.toml")));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
