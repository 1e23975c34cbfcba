//! Discrepancy model: scaler, predictor and detector trained together.
//!
//! The process-wide model lives behind [`DiscrepancyModel`]. Readers take an
//! `Arc` snapshot and score without holding the lock; training builds a
//! complete [`TrainedModel`] off to the side and swaps it in with a single
//! write, so a reader sees either the old model or the new one in full.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::{FeatureVector, FEATURE_COUNT};
use super::forest::{derive_seed, ForestParams, RandomForest};
use super::isolation::{IsolationForest, IsolationParams};
use super::scaler::StandardScaler;
use crate::config::ModelConfig;
use crate::error::{DataShortfall, Error, Result};
use crate::models::{round_cents, TrainingMetrics};

/// Bumped whenever the persisted layout or feature semantics change
pub const MODEL_SCHEMA_VERSION: u32 = 1;

/// Identifies the feature layout a model was trained on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub version: u32,
    pub features: Vec<String>,
}

impl ModelSchema {
    pub fn current() -> Self {
        Self {
            version: MODEL_SCHEMA_VERSION,
            features: FeatureVector::feature_names(),
        }
    }

    /// Reject models built for a different version or feature order
    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_SCHEMA_VERSION {
            return Err(Error::ModelSchema(format!(
                "model version {} does not match expected version {}",
                self.version, MODEL_SCHEMA_VERSION
            )));
        }
        let expected = FeatureVector::feature_names();
        if self.features != expected {
            return Err(Error::ModelSchema(format!(
                "model features [{}] do not match expected [{}]",
                self.features.join(", "),
                expected.join(", ")
            )));
        }
        Ok(())
    }
}

/// A fitted scaler, predictor and detector plus how they were evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub schema: ModelSchema,
    pub scaler: StandardScaler,
    pub predictor: RandomForest,
    pub detector: IsolationForest,
    pub metrics: TrainingMetrics,
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    fn scaled(&self, features: &FeatureVector) -> [f64; FEATURE_COUNT] {
        self.scaler.transform(&features.to_array())
    }

    /// Expected difference, rounded to cents
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        round_cents(self.predictor.predict(&self.scaled(features)))
    }

    /// Signed distance from the anomaly threshold; negative is anomalous
    pub fn anomaly_score(&self, features: &FeatureVector) -> f64 {
        self.detector.decision(&self.scaled(features))
    }

    pub fn is_anomaly(&self, features: &FeatureVector) -> bool {
        self.detector.is_anomaly(&self.scaled(features))
    }
}

/// Whether a usable model exists
#[derive(Debug, Clone, Default)]
pub enum ModelState {
    #[default]
    Untrained,
    Trained(TrainedModel),
}

impl ModelState {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Trained(_))
    }

    /// Predicted difference; 0.0 without a model
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        match self {
            Self::Trained(model) => model.predict(features),
            Self::Untrained => {
                warn!("Discrepancy model not trained, predicting 0.0");
                0.0
            }
        }
    }

    /// Anomaly flag; never anomalous without a model
    pub fn is_anomaly(&self, features: &FeatureVector) -> bool {
        match self {
            Self::Trained(model) => model.is_anomaly(features),
            Self::Untrained => false,
        }
    }

    pub fn anomaly_score(&self, features: &FeatureVector) -> f64 {
        match self {
            Self::Trained(model) => model.anomaly_score(features),
            Self::Untrained => 0.0,
        }
    }

    pub fn metrics(&self) -> Option<&TrainingMetrics> {
        match self {
            Self::Trained(model) => Some(&model.metrics),
            Self::Untrained => None,
        }
    }
}

/// Hyperparameters and gates for a training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub contamination: f64,
    pub test_fraction: f64,
    pub min_examples: usize,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for TrainingParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            contamination: config.contamination,
            test_fraction: config.test_fraction,
            min_examples: config.min_training_examples,
            seed: config.seed,
        }
    }
}

/// Fit a complete model from labeled examples.
///
/// A seeded shuffle holds out `ceil(n * test_fraction)` examples. The scaler
/// is fitted on the training split only; the predictor and detector are
/// fitted on the scaled training split and the predictor is evaluated on
/// the scaled held-out split.
pub fn fit(
    examples: &[(FeatureVector, f64)],
    params: &TrainingParams,
    trained_at: DateTime<Utc>,
) -> Result<TrainedModel> {
    let n = examples.len();
    let required = params.min_examples.max(2);
    if n < required {
        return Err(Error::InsufficientData(DataShortfall::TrainingSet {
            found: n,
            required,
        }));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = Pcg64Mcg::seed_from_u64(derive_seed(params.seed, n as u64));
    order.shuffle(&mut rng);

    let n_test = ((n as f64 * params.test_fraction).ceil() as usize).clamp(1, n - 1);
    let (test_idx, train_idx) = order.split_at(n_test);

    let raw_train: Vec<[f64; FEATURE_COUNT]> =
        train_idx.iter().map(|&i| examples[i].0.to_array()).collect();
    let y_train: Vec<f64> = train_idx.iter().map(|&i| examples[i].1).collect();

    let scaler = StandardScaler::fit(&raw_train);
    let x_train = scaler.transform_all(&raw_train);

    let predictor = RandomForest::fit(
        &x_train,
        &y_train,
        &ForestParams {
            n_estimators: params.n_estimators,
            max_depth: params.max_depth,
            seed: params.seed,
        },
    );
    let detector = IsolationForest::fit(
        &x_train,
        &IsolationParams {
            n_estimators: params.n_estimators,
            contamination: params.contamination,
            seed: params.seed,
        },
    );

    let (predicted, actual): (Vec<f64>, Vec<f64>) = test_idx
        .iter()
        .map(|&i| {
            let row = scaler.transform(&examples[i].0.to_array());
            (predictor.predict(&row), examples[i].1)
        })
        .unzip();

    let metrics = TrainingMetrics {
        mean_absolute_error: mean_absolute_error(&actual, &predicted),
        r2_score: r2_score(&actual, &predicted),
        training_samples: n,
        test_samples: n_test,
    };

    Ok(TrainedModel {
        schema: ModelSchema::current(),
        scaler,
        predictor,
        detector,
        metrics,
        trained_at,
    })
}

pub(crate) fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
pub(crate) fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Shared handle to the current model
#[derive(Debug, Default)]
pub struct DiscrepancyModel {
    state: RwLock<Arc<ModelState>>,
}

impl DiscrepancyModel {
    pub fn untrained() -> Self {
        Self::default()
    }

    pub fn with_model(model: TrainedModel) -> Self {
        Self {
            state: RwLock::new(Arc::new(ModelState::Trained(model))),
        }
    }

    /// The current model. Hold on to the snapshot to score several signals
    /// against the same model.
    pub fn snapshot(&self) -> Arc<ModelState> {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the current model in one step
    pub fn install(&self, model: TrainedModel) {
        let next = Arc::new(ModelState::Trained(model));
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    pub fn is_trained(&self) -> bool {
        self.snapshot().is_trained()
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.snapshot().predict(features)
    }

    pub fn is_anomaly(&self, features: &FeatureVector) -> bool {
        self.snapshot().is_anomaly(features)
    }

    /// Fit on `examples` and install the result
    pub fn train(
        &self,
        examples: &[(FeatureVector, f64)],
        params: &TrainingParams,
    ) -> Result<TrainingMetrics> {
        let model = fit(examples, params, Utc::now())?;
        let metrics = model.metrics.clone();
        self.install(model);
        info!(
            training_samples = metrics.training_samples,
            mae = metrics.mean_absolute_error,
            r2 = metrics.r2_score,
            "Discrepancy model trained"
        );
        Ok(metrics)
    }
}
