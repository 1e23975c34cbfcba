//! Isolation forest anomaly detector.
//!
//! Vectors that random axis-aligned cuts isolate quickly get a high score.
//! The decision threshold is the training-score quantile implied by the
//! contamination rate, so roughly that share of the training data is
//! flagged.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;
use super::forest::derive_seed;

type Row = [f64; FEATURE_COUNT];

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const MAX_SAMPLES: usize = 256;

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    External {
        size: usize,
    },
    Internal {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn fit(rows: &[Row], height_limit: usize, rng: &mut Pcg64Mcg) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut refs: Vec<&Row> = rows.iter().collect();
        tree.grow(&mut refs, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        rows: &mut [&Row],
        depth: usize,
        height_limit: usize,
        rng: &mut Pcg64Mcg,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::External { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary can separate these rows
        let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                    (lo.min(r[f]), hi.max(r[f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);

        rows.sort_by(|a, b| (a[feature] >= threshold).cmp(&(b[feature] >= threshold)));
        let mid = rows.iter().take_while(|r| r[feature] < threshold).count();
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1, height_limit, rng);
        let right = self.grow(right_rows, depth + 1, height_limit, rng);

        self.nodes[id] = Node::Internal {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &Row) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[id] {
                Node::External { size } => return depth + average_path_length(*size),
                Node::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsolationParams {
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.1,
            seed: 42,
        }
    }
}

/// Fitted isolation forest with its decision threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Subsample size each tree was grown on
    sample_size: usize,
    /// Scores above this are anomalous
    threshold: f64,
}

impl IsolationForest {
    /// Fit on scaled rows. `rows` must be non-empty.
    pub fn fit(rows: &[Row], params: &IsolationParams) -> Self {
        let n = rows.len();
        let sample_size = n.min(MAX_SAMPLES).max(1);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        // Distinct stream from the regressor's trees
        let base_seed = derive_seed(params.seed, u64::MAX);
        let trees = (0..params.n_estimators)
            .map(|t| {
                let mut rng = Pcg64Mcg::seed_from_u64(derive_seed(base_seed, t as u64));
                let subsample: Vec<Row> = sample(&mut rng, n, sample_size)
                    .into_iter()
                    .map(|i| rows[i])
                    .collect();
                IsolationTree::fit(&subsample, height_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        let mut scores: Vec<f64> = rows.iter().map(|r| forest.score(r)).collect();
        forest.threshold = quantile(&mut scores, 1.0 - params.contamination);
        forest
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn score(&self, row: &Row) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let mean_path =
            self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }

    /// Signed distance to the threshold; negative means anomalous
    pub fn decision(&self, row: &Row) -> f64 {
        self.threshold - self.score(row)
    }

    pub fn is_anomaly(&self, row: &Row) -> bool {
        self.decision(row) < 0.0
    }
}

/// Linear-interpolated quantile of `values` (sorted in place)
fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}
