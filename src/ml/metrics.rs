use std::fmt;

use serde::{Deserialize, Serialize};

pub fn accuracy(truth: &[usize], predicted: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    correct as f64 / truth.len() as f64
}

/// Rows are true classes, columns are predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(truth: &[usize], predicted: &[usize], labels: &[&str]) -> Self {
        let k = labels.len();
        let mut counts = vec![vec![0; k]; k];
        for (&t, &p) in truth.iter().zip(predicted) {
            if t < k && p < k {
                counts[t][p] += 1;
            }
        }
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            counts,
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12}", "")?;
        for label in &self.labels {
            write!(f, "{label:>10}")?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{label:>12}")?;
            for count in row {
                write!(f, "{count:>10}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    pub fn new(truth: &[usize], predicted: &[usize], labels: &[&str]) -> Self {
        let matrix = ConfusionMatrix::new(truth, predicted, labels);
        let k = labels.len();
        let classes: Vec<ClassMetrics> = (0..k)
            .map(|c| {
                let tp = matrix.counts[c][c];
                let predicted_c: usize = (0..k).map(|r| matrix.counts[r][c]).sum();
                let support: usize = matrix.counts[c].iter().sum();
                let precision = ratio(tp, predicted_c);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: labels[c].to_string(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total: usize = classes.iter().map(|c| c.support).sum();
        let kf = k.max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / kf,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / kf,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / kf,
            support: total,
        };
        let weight = |c: &ClassMetrics| ratio(c.support, total);
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: classes.iter().map(|c| c.precision * weight(c)).sum(),
            recall: classes.iter().map(|c| c.recall * weight(c)).sum(),
            f1: classes.iter().map(|c| c.f1 * weight(c)).sum(),
            support: total,
        };

        Self {
            classes,
            accuracy: accuracy(truth, predicted),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14}{:>11}{:>9}{:>10}{:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for row in self.classes.iter() {
            writeln!(
                f,
                "{:>14}{:>11.2}{:>9.2}{:>10.2}{:>9}",
                row.label, row.precision, row.recall, row.f1, row.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14}{:>11}{:>9}{:>10.2}{:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for row in [&self.macro_avg, &self.weighted_avg] {
            writeln!(
                f,
                "{:>14}{:>11.2}{:>9.2}{:>10.2}{:>9}",
                row.label, row.precision, row.recall, row.f1, row.support
            )?;
        }
        Ok(())
    }
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn report_matches_hand_counts() {
        let truth = vec![0, 0, 1, 1, 1];
        let predicted = vec![0, 1, 1, 1, 0];
        let report = ClassificationReport::new(&truth, &predicted, &["Fail", "Pass"]);

        assert_relative_eq!(report.accuracy, 0.6);
        assert_relative_eq!(report.classes[0].precision, 0.5);
        assert_relative_eq!(report.classes[0].recall, 0.5);
        assert_relative_eq!(report.classes[1].precision, 2.0 / 3.0);
        assert_relative_eq!(report.classes[1].recall, 2.0 / 3.0);
        assert_eq!(report.classes[1].support, 3);
        assert_eq!(report.macro_avg.support, 5);
    }

    #[test]
    fn confusion_rows_are_truth() {
        let matrix = ConfusionMatrix::new(&[0, 1, 1], &[1, 1, 0], &["Fail", "Pass"]);
        assert_eq!(matrix.counts, vec![vec![0, 1], vec![1, 1]]);
        assert!(matrix.to_string().contains("Fail"));
    }

    #[test]
    fn mean_std_of_constant_is_zero_spread() {
        assert_eq!(mean_std(&[2.0, 2.0, 2.0]), (2.0, 0.0));
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }
}
