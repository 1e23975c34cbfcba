//! Random forest regressor over scaled feature rows.
//!
//! Each tree is a CART regression tree grown on a bootstrap sample with
//! variance-reduction splits. Nodes live in a flat vector so a fitted forest
//! serializes as plain data.

use std::cmp::Ordering;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;

type Row = [f64; FEATURE_COUNT];

/// Derive an independent per-tree seed from the forest seed
pub(crate) fn derive_seed(seed: u64, index: u64) -> u64 {
    seed ^ index.wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 16,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grow a tree on the rows selected by `indices` (duplicates allowed)
    fn fit(x: &[Row], y: &[f64], indices: &mut [usize], max_depth: usize) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, indices, 0, max_depth);
        tree
    }

    fn grow(
        &mut self,
        x: &[Row],
        y: &[f64],
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
    ) -> usize {
        let n = indices.len() as f64;
        let value = indices.iter().map(|&i| y[i]).sum::<f64>() / n;

        let split = if depth < max_depth && indices.len() >= 2 {
            best_split(x, y, indices)
        } else {
            None
        };

        let Some((feature, threshold)) = split else {
            self.nodes.push(Node::Leaf { value });
            return self.nodes.len() - 1;
        };

        // Reserve this node's slot, then fill children
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let mid = partition(indices, |i| x[i][feature] <= threshold);
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.grow(x, y, left_idx, depth + 1, max_depth);
        let right = self.grow(x, y, right_idx, depth + 1, max_depth);

        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    pub fn predict(&self, row: &Row) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Best (feature, threshold) by summed squared error, or `None` when no
/// split reduces it
fn best_split(x: &[Row], y: &[f64], indices: &[usize]) -> Option<(usize, f64)> {
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<(usize, f64, f64)> = None;
    let mut sorted = indices.to_vec();

    for feature in 0..FEATURE_COUNT {
        sorted.sort_by(|&a, &b| {
            x[a][feature]
                .partial_cmp(&x[b][feature])
                .unwrap_or(Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[sorted[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let here = x[sorted[k]][feature];
            let next = x[sorted[k + 1]][feature];
            if next - here <= f64::EPSILON * here.abs().max(1.0) {
                continue;
            }

            let nl = (k + 1) as f64;
            let nr = (n - k - 1) as f64;
            let right_sum = total_sum - left_sum;
            let sse = (left_sq - left_sum * left_sum / nl)
                + ((total_sq - left_sq) - right_sum * right_sum / nr);

            if best.map_or(true, |(_, _, b)| sse < b) {
                best = Some((feature, (here + next) / 2.0, sse));
            }
        }
    }

    best.filter(|&(_, _, sse)| sse < parent_sse - 1e-12)
        .map(|(f, t, _)| (f, t))
}

/// Reorder so rows matching `pred` come first; returns how many matched
fn partition<F: Fn(usize) -> bool>(indices: &mut [usize], pred: F) -> usize {
    let mut mid = 0;
    for k in 0..indices.len() {
        if pred(indices[k]) {
            indices.swap(mid, k);
            mid += 1;
        }
    }
    mid
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit on scaled rows. `x` and `y` must be the same non-zero length.
    pub fn fit(x: &[Row], y: &[f64], params: &ForestParams) -> Self {
        let n = x.len();
        let trees = (0..params.n_estimators)
            .map(|t| {
                let mut rng = Pcg64Mcg::seed_from_u64(derive_seed(params.seed, t as u64));
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &mut sample, params.max_depth)
            })
            .collect();
        Self { trees }
    }

    pub fn predict(&self, row: &Row) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
