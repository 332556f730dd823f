//! CART decision trees over dense `f64` rows.
//!
//! Classification trees split on weighted Gini impurity and store a class distribution at each
//! leaf. Regression trees split on weighted squared error and store a single value, which
//! boosting later overwrites with its own leaf estimate.

use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

/// What the tree is fitted against.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Classes { labels: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grows a tree on the rows in `samples`, each weighted by `weights[row]`.
    ///
    /// Returns the tree and the total weighted impurity decrease per feature.
    pub fn fit(
        x: &[Vec<f64>],
        target: Target<'_>,
        samples: Vec<usize>,
        weights: &[f64],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>) {
        let n_features = x.first().map_or(0, Vec::len);
        let mut builder = Builder {
            x,
            target,
            weights,
            params,
            n_features,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.grow(samples, rng);
        let tree = DecisionTree {
            nodes: builder.nodes,
        };
        (tree, builder.importances)
    }

    /// Index of the leaf node `row` falls into.
    pub fn leaf_index(&self, row: &[f64]) -> usize {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { .. } => return current,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn leaf_value(&self, row: &[f64]) -> &[f64] {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => &[],
        }
    }

    pub fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(Node::Leaf { value: slot }) = self.nodes.get_mut(leaf) {
            *slot = value;
        }
    }
}

#[derive(Debug, Clone)]
enum Stats {
    Class { counts: Vec<f64>, total: f64 },
    Value { w: f64, wy: f64, wyy: f64 },
}

impl Stats {
    fn empty(target: &Target<'_>) -> Self {
        match target {
            Target::Classes { n_classes, .. } => Stats::Class {
                counts: vec![0.0; *n_classes],
                total: 0.0,
            },
            Target::Values(_) => Stats::Value {
                w: 0.0,
                wy: 0.0,
                wyy: 0.0,
            },
        }
    }

    fn add(&mut self, target: &Target<'_>, sample: usize, weight: f64, sign: f64) {
        match (self, target) {
            (Stats::Class { counts, total }, Target::Classes { labels, .. }) => {
                counts[labels[sample]] += sign * weight;
                *total += sign * weight;
            }
            (Stats::Value { w, wy, wyy }, Target::Values(values)) => {
                let y = values[sample];
                *w += sign * weight;
                *wy += sign * weight * y;
                *wyy += sign * weight * y * y;
            }
            _ => {}
        }
    }

    fn weight(&self) -> f64 {
        match self {
            Stats::Class { total, .. } => *total,
            Stats::Value { w, .. } => *w,
        }
    }

    /// Impurity multiplied by node weight.
    fn cost(&self) -> f64 {
        match self {
            Stats::Class { counts, total } => {
                if *total <= 0.0 {
                    return 0.0;
                }
                let sum_sq: f64 = counts.iter().map(|c| c * c).sum();
                (total - sum_sq / total).max(0.0)
            }
            Stats::Value { w, wy, wyy } => {
                if *w <= 0.0 {
                    return 0.0;
                }
                (wyy - wy * wy / w).max(0.0)
            }
        }
    }

    fn leaf(&self) -> Vec<f64> {
        match self {
            Stats::Class { counts, total } => {
                if *total <= 0.0 {
                    let n = counts.len().max(1) as f64;
                    return vec![1.0 / n; counts.len()];
                }
                counts.iter().map(|c| c / total).collect()
            }
            Stats::Value { w, wy, .. } => {
                if *w <= 0.0 {
                    vec![0.0]
                } else {
                    vec![wy / w]
                }
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a> {
    x: &'a [Vec<f64>],
    target: Target<'a>,
    weights: &'a [f64],
    params: &'a TreeParams,
    n_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl Builder<'_> {
    fn grow(&mut self, root: Vec<usize>, rng: &mut StdRng) {
        let mut stack = vec![(root, 0usize, self.push_leaf())];
        while let Some((samples, depth, slot)) = stack.pop() {
            let stats = self.stats_for(&samples);
            let can_split = samples.len() >= self.params.min_samples_split.max(2)
                && samples.len() >= 2 * self.params.min_samples_leaf.max(1)
                && self.params.max_depth.map_or(true, |max| depth < max)
                && stats.cost() > 1e-12;

            let split = if can_split {
                self.best_split(&samples, &stats, rng)
            } else {
                None
            };

            match split {
                Some(best) => {
                    self.importances[best.feature] += best.gain;
                    let (left, right): (Vec<usize>, Vec<usize>) = samples
                        .into_iter()
                        .partition(|&s| self.x[s][best.feature] <= best.threshold);
                    let left_slot = self.push_leaf();
                    let right_slot = self.push_leaf();
                    self.nodes[slot] = Node::Split {
                        feature: best.feature,
                        threshold: best.threshold,
                        left: left_slot,
                        right: right_slot,
                    };
                    stack.push((right, depth + 1, right_slot));
                    stack.push((left, depth + 1, left_slot));
                }
                None => {
                    self.nodes[slot] = Node::Leaf {
                        value: stats.leaf(),
                    };
                }
            }
        }
    }

    fn push_leaf(&mut self) -> usize {
        self.nodes.push(Node::Leaf { value: Vec::new() });
        self.nodes.len() - 1
    }

    fn stats_for(&self, samples: &[usize]) -> Stats {
        let mut stats = Stats::empty(&self.target);
        for &s in samples {
            stats.add(&self.target, s, self.weights[s], 1.0);
        }
        stats
    }

    fn best_split(&self, samples: &[usize], parent: &Stats, rng: &mut StdRng) -> Option<BestSplit> {
        let k = self.params.max_features.resolve(self.n_features);
        let candidates: Vec<usize> = if k >= self.n_features {
            (0..self.n_features).collect()
        } else {
            let mut picked = index::sample(rng, self.n_features, k).into_vec();
            picked.sort_unstable();
            picked
        };

        let parent_cost = parent.cost();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        for feature in candidates {
            order.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut left = Stats::empty(&self.target);
            let mut right = parent.clone();

            for i in 0..order.len() - 1 {
                let sample = order[i];
                let weight = self.weights[sample];
                left.add(&self.target, sample, weight, 1.0);
                right.add(&self.target, sample, weight, -1.0);

                let here = self.x[sample][feature];
                let next = self.x[order[i + 1]][feature];
                if next <= here {
                    continue;
                }
                let left_count = i + 1;
                if left_count < min_leaf || order.len() - left_count < min_leaf {
                    continue;
                }
                if left.weight() <= 0.0 || right.weight() <= 0.0 {
                    continue;
                }
                let gain = parent_cost - left.cost() - right.cost();
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn classification_tree_separates_blobs() {
        let x = vec![vec![1.0], vec![1.2], vec![1.1], vec![5.0], vec![5.3], vec![4.9]];
        let labels = vec![0, 0, 0, 1, 1, 1];
        let weights = vec![1.0; 6];
        let mut rng = StdRng::seed_from_u64(7);
        let (tree, importances) = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            (0..6).collect(),
            &weights,
            &TreeParams::default(),
            &mut rng,
        );

        assert_eq!(tree.leaf_value(&[1.05]), &[1.0, 0.0]);
        assert_eq!(tree.leaf_value(&[6.0]), &[0.0, 1.0]);
        assert!(importances[0] > 0.0);
        assert_eq!(tree.nodes.len(), 3);
    }

    #[test]
    fn regression_leaf_holds_weighted_mean() {
        let x = vec![vec![0.0], vec![0.0], vec![1.0]];
        let values = vec![1.0, 3.0, 10.0];
        let weights = vec![1.0, 3.0, 1.0];
        let mut rng = StdRng::seed_from_u64(1);
        let (tree, _) = DecisionTree::fit(
            &x,
            Target::Values(&values),
            vec![0, 1, 2],
            &weights,
            &TreeParams::default(),
            &mut rng,
        );

        assert_relative_eq!(tree.leaf_value(&[0.0])[0], 2.5);
        assert_relative_eq!(tree.leaf_value(&[1.0])[0], 10.0);
    }

    #[test]
    fn depth_limit_produces_stump() {
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
        let labels = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let weights = vec![1.0; 8];
        let params = TreeParams {
            max_depth: Some(1),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let (tree, _) = DecisionTree::fit(
            &x,
            Target::Classes {
                labels: &labels,
                n_classes: 2,
            },
            (0..8).collect(),
            &weights,
            &params,
            &mut rng,
        );
        assert!(tree.nodes.len() <= 3);
    }

    #[test]
    fn max_features_never_resolves_to_zero() {
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::All.resolve(9), 9);
    }
}
