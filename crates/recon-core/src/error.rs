//! Error types for Recon

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider unreachable or the account is inactive there
    #[error("External provider unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("Insufficient training data: {0}")]
    InsufficientData(DataShortfall),

    /// The provider adjustment call or its local bookkeeping failed
    #[error("Adjustment failed: {0}")]
    Adjustment(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Model schema mismatch: {0}")]
    ModelSchema(String),

    #[error("Reconciliation already in progress for account {0}")]
    InProgress(i64),
}

/// Why a training run could not assemble enough examples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataShortfall {
    /// Not enough completed reconciliation outcomes exist at all
    NoOutcomes { found: usize, required: usize },
    /// Outcomes exist, but too few could be turned into feature vectors
    UnusableOutcomes { usable: usize, required: usize },
    /// The predictor itself was handed too few labeled examples
    TrainingSet { found: usize, required: usize },
}

impl fmt::Display for DataShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOutcomes { found, required } => write!(
                f,
                "only {} completed reconciliations found, need at least {}",
                found, required
            ),
            Self::UnusableOutcomes { usable, required } => write!(
                f,
                "completed reconciliations exist but only {} could be turned into training examples, need at least {}",
                usable, required
            ),
            Self::TrainingSet { found, required } => write!(
                f,
                "{} labeled examples supplied, need at least {}",
                found, required
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
