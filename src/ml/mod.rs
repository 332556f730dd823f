pub mod boosting;
pub mod forest;
pub mod linear;
pub mod metrics;
pub mod search;
pub mod split;
pub mod tree;
pub mod voting;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("cannot fit on an empty dataset")]
    EmptyDataset,
    #[error("need at least two classes to fit a classifier, found {0}")]
    TooFewClasses(usize),
    #[error("expected {expected} features per row, found {found}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("label {label} is outside 0..{n_classes}")]
    LabelOutOfRange { label: usize, n_classes: usize },
}

/// A row-major design matrix with integer class labels in `0..n_classes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<usize>,
    pub n_classes: usize,
}

impl Dataset {
    pub fn new(x: Vec<Vec<f64>>, y: Vec<usize>, n_classes: usize) -> Result<Self, ModelError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ModelError::EmptyDataset);
        }
        let width = x[0].len();
        if let Some(row) = x.iter().find(|row| row.len() != width) {
            return Err(ModelError::FeatureMismatch {
                expected: width,
                found: row.len(),
            });
        }
        if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
            return Err(ModelError::LabelOutOfRange { label, n_classes });
        }
        Ok(Self { x, y, n_classes })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.x.first().map_or(0, Vec::len)
    }

    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            x: indices.iter().map(|&i| self.x[i].clone()).collect(),
            y: indices.iter().map(|&i| self.y[i]).collect(),
            n_classes: self.n_classes,
        }
    }

    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &label in &self.y {
            counts[label] += 1;
        }
        counts
    }

    /// Fitting needs at least two populated classes.
    pub fn ensure_trainable(&self) -> Result<(), ModelError> {
        if self.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        let populated = self.class_counts().iter().filter(|&&c| c > 0).count();
        if populated < 2 {
            return Err(ModelError::TooFewClasses(populated));
        }
        Ok(())
    }
}

pub trait Classifier: Sync {
    fn n_classes(&self) -> usize;

    fn n_features(&self) -> usize;

    /// Class probabilities for one row; sums to 1.
    fn predict_proba(&self, row: &[f64]) -> Vec<f64>;

    fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row))
    }

    fn check_width(&self, row: &[f64]) -> Result<(), ModelError> {
        if row.len() != self.n_features() {
            return Err(ModelError::FeatureMismatch {
                expected: self.n_features(),
                found: row.len(),
            });
        }
        Ok(())
    }
}

/// First index of the maximum; ties resolve to the lower class.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = i;
        }
    }
    best
}

/// Any fitted learner this crate can persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Model {
    Forest(forest::RandomForest),
    Boosting(boosting::GradientBoosting),
    Logistic(linear::LogisticRegression),
}

impl Model {
    pub fn kind(&self) -> &'static str {
        match self {
            Model::Forest(_) => "random_forest",
            Model::Boosting(_) => "gradient_boosting",
            Model::Logistic(_) => "logistic_regression",
        }
    }
}

impl Classifier for Model {
    fn n_classes(&self) -> usize {
        match self {
            Model::Forest(m) => m.n_classes(),
            Model::Boosting(m) => m.n_classes(),
            Model::Logistic(m) => m.n_classes(),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            Model::Forest(m) => m.n_features(),
            Model::Boosting(m) => m.n_features(),
            Model::Logistic(m) => m.n_features(),
        }
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        match self {
            Model::Forest(m) => m.predict_proba(row),
            Model::Boosting(m) => m.predict_proba(row),
            Model::Logistic(m) => m.predict_proba(row),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Dataset;

    /// Two separable blobs on the first feature with a noise column.
    pub fn two_blobs(per_class: usize) -> Dataset {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..per_class {
            let jitter = (i % 7) as f64 * 0.1;
            x.push(vec![1.0 + jitter, (i % 3) as f64]);
            y.push(0);
            x.push(vec![4.0 + jitter, (i % 3) as f64]);
            y.push(1);
        }
        Dataset::new(x, y, 2).unwrap()
    }

    /// Three classes split on the first feature.
    pub fn three_bands(per_class: usize) -> Dataset {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..per_class {
            let jitter = (i % 5) as f64 * 0.05;
            for class in 0..3 {
                x.push(vec![class as f64 * 2.0 + jitter, (i % 4) as f64]);
                y.push(class);
            }
        }
        Dataset::new(x, y, 3).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
    }

    #[test]
    fn single_class_data_is_not_trainable() {
        let data = Dataset::new(vec![vec![1.0], vec![2.0]], vec![1, 1], 2).unwrap();
        assert_eq!(data.ensure_trainable(), Err(ModelError::TooFewClasses(1)));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::new(vec![vec![1.0, 2.0], vec![3.0]], vec![0, 1], 2).unwrap_err();
        assert_eq!(err, ModelError::FeatureMismatch { expected: 2, found: 1 });
    }
}
