use serde::{Deserialize, Serialize};

use super::{Classifier, Dataset, ModelError};

/// L2-regularized multinomial logistic regression on standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularization strength.
    pub c: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl LogisticParams {
    pub fn fit(&self, data: &Dataset) -> Result<LogisticRegression, ModelError> {
        data.ensure_trainable()?;
        let n = data.len();
        let d = data.n_features();
        let k = data.n_classes;
        let scaler = Scaler::fit(&data.x);
        let x: Vec<Vec<f64>> = data.x.iter().map(|row| scaler.transform(row)).collect();

        let mut weights = vec![vec![0.0; d]; k];
        let mut bias = vec![0.0; k];
        let penalty = 1.0 / (self.c.max(1e-12) * n as f64);
        let step = 1.0 / (0.5 * d as f64).max(1.0);

        for _ in 0..self.max_iter {
            let mut grad_w = vec![vec![0.0; d]; k];
            let mut grad_b = vec![0.0; k];
            for (row, &label) in x.iter().zip(&data.y) {
                let proba = softmax(&logits(&weights, &bias, row));
                for class in 0..k {
                    let err = proba[class] - if class == label { 1.0 } else { 0.0 };
                    grad_b[class] += err;
                    for (g, v) in grad_w[class].iter_mut().zip(row) {
                        *g += err * v;
                    }
                }
            }

            let mut norm = 0.0;
            for class in 0..k {
                grad_b[class] /= n as f64;
                norm += grad_b[class] * grad_b[class];
                for j in 0..d {
                    let g = grad_w[class][j] / n as f64 + penalty * weights[class][j];
                    grad_w[class][j] = g;
                    norm += g * g;
                }
            }
            if norm.sqrt() < self.tolerance {
                break;
            }
            for class in 0..k {
                bias[class] -= step * grad_b[class];
                for j in 0..d {
                    weights[class][j] -= step * grad_w[class][j];
                }
            }
        }

        Ok(LogisticRegression {
            weights,
            bias,
            scaler,
            n_classes: k,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    fn fit(x: &[Vec<f64>]) -> Self {
        let d = x.first().map_or(0, Vec::len);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; d];
        for row in x {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut var = vec![0.0; d];
        for row in x {
            for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m) * (v - m) / n;
            }
        }
        let scale = var
            .into_iter()
            .map(|v| if v > 1e-12 { v.sqrt() } else { 1.0 })
            .collect();
        Self { mean, scale }
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

fn logits(weights: &[Vec<f64>], bias: &[f64], row: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .zip(bias)
        .map(|(w, b)| b + w.iter().zip(row).map(|(a, v)| a * v).sum::<f64>())
        .collect()
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    scaler: Scaler,
    n_classes: usize,
}

impl Classifier for LogisticRegression {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.scaler.mean.len()
    }

    fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        softmax(&logits(&self.weights, &self.bias, &self.scaler.transform(row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::two_blobs;

    #[test]
    fn logistic_fits_linearly_separable_data() {
        let params = LogisticParams {
            c: 1.0,
            max_iter: 500,
            tolerance: 1e-6,
        };
        let model = params.fit(&two_blobs(15)).unwrap();
        assert_eq!(model.predict(&[1.2, 0.0]), 0);
        assert_eq!(model.predict(&[4.3, 0.0]), 1);
        assert!(model.predict_proba(&[5.0, 1.0])[1] > 0.8);
    }

    #[test]
    fn constant_columns_do_not_divide_by_zero() {
        let scaler = Scaler::fit(&[vec![2.0, 1.0], vec![2.0, 3.0]]);
        assert_eq!(scaler.transform(&[2.0, 2.0]), vec![0.0, 0.0]);
    }
}
