//! Gradient boosted trees with log-loss.
//!
//! Binary problems fit one regression tree per stage on the sigmoid residual; problems with
//! more classes fit one tree per class per stage on the softmax residual. Leaf values are
//! replaced by a single Newton step after each tree is grown.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, Target, TreeParams};
use super::{Classifier, Dataset, ModelError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub seed: u64,
}

impl BoostingParams {
    pub fn fit(&self, data: &Dataset) -> Result<GradientBoosting, ModelError> {
        data.ensure_trainable()?;
        let n = data.len();
        let k = data.n_classes;
        let outputs = if k == 2 { 1 } else { k };
        let tree_params = TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: MaxFeatures::All,
        };

        let counts = data.class_counts();
        let init: Vec<f64> = if outputs == 1 {
            let p = (counts[1] as f64 / n as f64).clamp(1e-6, 1.0 - 1e-6);
            vec![(p / (1.0 - p)).ln()]
        } else {
            counts
                .iter()
                .map(|&c| ((c as f64).max(1e-6) / n as f64).ln())
                .collect()
        };

        let mut raw: Vec<Vec<f64>> = vec![init.clone(); n];
        let mut stages: Vec<Vec<DecisionTree>> = Vec::with_capacity(self.n_estimators);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let weights = vec![1.0; n];
        let sample_size = ((n as f64) * self.subsample.clamp(0.0, 1.0)).round() as usize;
        let sample_size = sample_size.clamp(1, n);

        for _ in 0..self.n_estimators {
            let probs: Vec<Vec<f64>> = raw.iter().map(|r| raw_to_proba(r, k)).collect();
            let samples: Vec<usize> = if sample_size < n {
                let mut picked = index::sample(&mut rng, n, sample_size).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let mut stage = Vec::with_capacity(outputs);
            for output in 0..outputs {
                let class = if outputs == 1 { 1 } else { output };
                let residuals: Vec<f64> = (0..n)
                    .map(|i| indicator(data.y[i] == class) - probs[i][class])
                    .collect();

                let (mut tree, _) = DecisionTree::fit(
                    &data.x,
                    Target::Values(&residuals),
                    samples.clone(),
                    &weights,
                    &tree_params,
                    &mut rng,
                );
                newton_leaves(&mut tree, &data.x, &samples, &residuals, k);

                for (i, row) in data.x.iter().enumerate() {
                    raw[i][output] += self.learning_rate * tree.leaf_value(row)[0];
                }
                stage.push(tree);
            }
            stages.push(stage);
        }

        Ok(GradientBoosting {
            init,
            stages,
            learning_rate: self.learning_rate,
            n_classes: k,
            n_features: data.n_features(),
        })
    }
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Replaces each leaf value with `sum(r) / sum(|r| (1 - |r|))`, scaled by `(K-1)/K` for
/// multiclass.
fn newton_leaves(
    tree: &mut DecisionTree,
    x: &[Vec<f64>],
    samples: &[usize],
    residuals: &[f64],
    n_classes: usize,
) {
    let mut sums: std::collections::BTreeMap<usize, (f64, f64)> = std::collections::BTreeMap::new();
    for &s in samples {
        let leaf = tree.leaf_index(&x[s]);
        let r = residuals[s];
        let entry = sums.entry(leaf).or_insert((0.0, 0.0));
        entry.0 += r;
        entry.1 += r.abs() * (1.0 - r.abs());
    }
    let scale = if n_classes > 2 {
        (n_classes as f64 - 1.0) / n_classes as f64
    } else {
        1.0
    };
    for (leaf, (numerator, denominator)) in sums {
        let value = if denominator.abs() < 1e-150 {
            0.0
        } else {
            scale * numerator / denominator
        };
        tree.set_leaf_value(leaf, vec![value]);
    }
}

fn raw_to_proba(raw: &[f64], n_classes: usize) -> Vec<f64> {
    if raw.len() == 1 {
        let p = 1.0 / (1.0 + (-raw[0]).exp());
        return vec![1.0 - p, p];
    }
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    let mut proba: Vec<f64> = exps.iter().map(|e| e / total).collect();
    proba.resize(n_classes, 0.0);
    proba
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: Vec<f64>,
    stages: Vec<Vec<DecisionTree>>,
    learning_rate: f64,
    n_classes: usize,
    n_features: usize,
}

impl GradientBoosting {
    fn raw_score(&self, row: &[f64]) -> Vec<f64> {
        let mut raw = self.init.clone();
        for stage in &self.stages {
            for (slot, tree) in raw.iter_mut().zip(stage) {
                *slot += self.learning_rate * tree.leaf_value(row)[0];
            }
        }
        raw
    }
}

impl Classifier for GradientBoosting {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        raw_to_proba(&self.raw_score(row), self.n_classes)
    }
}
