//! Bagged ensemble of classification trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, Target, TreeParams};
use super::{Classifier, Dataset, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassWeight {
    None,
    /// Inverse class frequency over the full training set.
    Balanced,
    /// Inverse class frequency recomputed on each bootstrap sample.
    BalancedSubsample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl ForestParams {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }

    pub fn fit(&self, data: &Dataset) -> Result<RandomForest, ModelError> {
        data.ensure_trainable()?;
        let n = data.len();
        let n_features = data.n_features();
        let tree_params = self.tree_params();
        let global_weights = balanced_weights(&data.y, data.n_classes);

        let fitted: Vec<(DecisionTree, Vec<f64>)> = (0..self.n_estimators.max(1))
            .into_par_iter()
            .map(|tree_index| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(tree_index as u64));
                let mut draws = vec![0usize; n];
                for _ in 0..n {
                    draws[rng.gen_range(0..n)] += 1;
                }

                let class_weights = match self.class_weight {
                    ClassWeight::None => vec![1.0; data.n_classes],
                    ClassWeight::Balanced => global_weights.clone(),
                    ClassWeight::BalancedSubsample => {
                        let mut counts = vec![0.0; data.n_classes];
                        for (i, &times) in draws.iter().enumerate() {
                            counts[data.y[i]] += times as f64;
                        }
                        inverse_frequency(&counts)
                    }
                };

                let weights: Vec<f64> = draws
                    .iter()
                    .enumerate()
                    .map(|(i, &times)| times as f64 * class_weights[data.y[i]])
                    .collect();
                let samples: Vec<usize> = (0..n).filter(|&i| draws[i] > 0).collect();

                DecisionTree::fit(
                    &data.x,
                    Target::Classes {
                        labels: &data.y,
                        n_classes: data.n_classes,
                    },
                    samples,
                    &weights,
                    &tree_params,
                    &mut rng,
                )
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, tree_importances) in fitted {
            let total: f64 = tree_importances.iter().sum();
            if total > 0.0 {
                for (slot, value) in importances.iter_mut().zip(&tree_importances) {
                    *slot += value / total;
                }
            }
            trees.push(tree);
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(RandomForest {
            trees,
            n_features,
            n_classes: data.n_classes,
            importances,
        })
    }
}

fn balanced_weights(labels: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &label in labels {
        counts[label] += 1.0;
    }
    inverse_frequency(&counts)
}

/// `n_samples / (n_present_classes * count)` per class; absent classes get zero weight.
fn inverse_frequency(counts: &[f64]) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    let present = counts.iter().filter(|&&c| c > 0.0).count().max(1) as f64;
    counts
        .iter()
        .map(|&c| if c > 0.0 { total / (present * c) } else { 0.0 })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Mean impurity decrease per feature, normalized to sum to one.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

}

impl Classifier for RandomForest {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (slot, p) in proba.iter_mut().zip(tree.leaf_value(row)) {
                *slot += p;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::{three_bands, two_blobs};
    use approx::assert_relative_eq;

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            max_depth: Some(5),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            class_weight: ClassWeight::BalancedSubsample,
            seed: 42,
        }
    }

    #[test]
    fn forest_learns_separable_classes() {
        let data = two_blobs(20);
        let forest = small_params().fit(&data).unwrap();

        assert_eq!(forest.trees.len(), 15);
        assert_eq!(forest.predict(&[1.1, 0.0]), 0);
        assert_eq!(forest.predict(&[4.2, 1.0]), 1);
        let proba = forest.predict_proba(&[4.2, 1.0]);
        assert_relative_eq!(proba.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn importances_favor_informative_feature() {
        let forest = small_params().fit(&two_blobs(20)).unwrap();
        let importances = forest.feature_importances();
        assert!(importances[0] > importances[1]);
        assert_relative_eq!(importances.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn same_seed_gives_identical_forests() {
        let data = three_bands(10);
        let a = small_params().fit(&data).unwrap();
        let b = small_params().fit(&data).unwrap();
        assert_eq!(a.predict_proba(&[2.1, 1.0]), b.predict_proba(&[2.1, 1.0]));
    }

    #[test]
    fn inverse_frequency_balances_minority() {
        let weights = inverse_frequency(&[30.0, 10.0]);
        assert_relative_eq!(weights[0], 40.0 / 60.0);
        assert_relative_eq!(weights[1], 2.0);
    }
}
