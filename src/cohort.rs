use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::TrainedArtifacts;
use crate::config::{ATTENTION_SCORE, EXEMPLARS_PER_DOMAIN, SCORE_SCALE};
use crate::exemplar::{DomainKey, ExemplarPrediction};
use crate::models::RiskLevel;
use crate::predictor::{PredictionResult, Predictor};

const EXCELLENT_SCORE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PerformanceLevel {
    Excellent,
    VeryGood,
    Good,
    Average,
    Weak,
    Poor,
}

impl PerformanceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 5.5 {
            PerformanceLevel::Excellent
        } else if score >= 5.0 {
            PerformanceLevel::VeryGood
        } else if score >= 4.0 {
            PerformanceLevel::Good
        } else if score >= 3.0 {
            PerformanceLevel::Average
        } else if score >= 2.0 {
            PerformanceLevel::Weak
        } else {
            PerformanceLevel::Poor
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PerformanceLevel::Excellent => "Excellent",
            PerformanceLevel::VeryGood => "Very good",
            PerformanceLevel::Good => "Good",
            PerformanceLevel::Average => "Average",
            PerformanceLevel::Weak => "Weak",
            PerformanceLevel::Poor => "Poor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassEntry {
    pub student_id: String,
    pub predicted_score: f64,
    pub prob_pass: f64,
    pub risk_level: RiskLevel,
    pub level: PerformanceLevel,
    pub top_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ClassStats {
    /// Population statistics; `None` for an empty class.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let variance = sorted.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n as f64;
        Some(Self {
            count: n,
            mean,
            median,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassAnalysis {
    pub lecturer: String,
    pub subject: String,
    pub entries: Vec<ClassEntry>,
    pub failed: Vec<(String, String)>,
    pub stats: Option<ClassStats>,
    pub distribution: BTreeMap<PerformanceLevel, usize>,
    pub pass_rate: f64,
    pub excellent_rate: f64,
    pub attention: Vec<ClassEntry>,
    pub common_reasons: Vec<(String, usize)>,
    pub exemplar: Option<ExemplarPrediction>,
}

fn share(scores: &[f64], threshold: f64) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().filter(|&&s| s >= threshold).count() as f64 / scores.len() as f64
    }
}

/// Predicts every listed student for one (lecturer, subject) offering and aggregates the class.
pub fn analyze_class(artifacts: &TrainedArtifacts, students: &[String], lecturer: &str, subject: &str) -> ClassAnalysis {
    let predictor = Predictor::new(artifacts);
    let results: Vec<(String, PredictionResult)> = students
        .par_iter()
        .map(|student| (student.clone(), predictor.predict(student, lecturer, subject)))
        .collect();

    let mut entries = Vec::new();
    let mut failed = Vec::new();
    let mut reason_counts: HashMap<String, usize> = HashMap::new();
    for (student, result) in results {
        match result {
            PredictionResult::Scored(prediction) => {
                for reason in &prediction.reasons {
                    *reason_counts.entry(reason.reason.clone()).or_insert(0) += 1;
                }
                entries.push(ClassEntry {
                    student_id: student,
                    predicted_score: prediction.predicted_score,
                    prob_pass: prediction.prob_pass,
                    risk_level: prediction.risk_level,
                    level: PerformanceLevel::from_score(prediction.predicted_score),
                    top_reason: prediction.reasons.first().map(|r| r.reason.clone()),
                });
            }
            PredictionResult::Failed { message } => failed.push((student, message)),
        }
    }

    let scores: Vec<f64> = entries.iter().map(|e| e.predicted_score).collect();
    let stats = ClassStats::from_scores(&scores);
    let mut distribution = BTreeMap::new();
    for entry in &entries {
        *distribution.entry(entry.level).or_insert(0) += 1;
    }

    let mut attention: Vec<ClassEntry> = entries
        .iter()
        .filter(|e| e.predicted_score < ATTENTION_SCORE)
        .cloned()
        .collect();
    attention.sort_by(|a, b| {
        a.predicted_score
            .partial_cmp(&b.predicted_score)
            .unwrap_or(Ordering::Equal)
    });

    let mut common_reasons: Vec<(String, usize)> = reason_counts.into_iter().collect();
    common_reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let exemplar = stats.as_ref().and_then(|s| {
        artifacts
            .exemplars
            .predict(DomainKey::CloAttendance, &[s.mean / SCORE_SCALE], EXEMPLARS_PER_DOMAIN)
    });

    info!(
        lecturer,
        subject,
        scored = entries.len(),
        failed = failed.len(),
        attention = attention.len(),
        "class analyzed"
    );
    ClassAnalysis {
        lecturer: lecturer.to_string(),
        subject: subject.to_string(),
        pass_rate: share(&scores, ATTENTION_SCORE),
        excellent_rate: share(&scores, EXCELLENT_SCORE),
        entries,
        failed,
        stats,
        distribution,
        attention,
        common_reasons,
        exemplar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use approx::assert_relative_eq;

    #[test]
    fn levels_follow_score_bands() {
        assert_eq!(PerformanceLevel::from_score(5.5), PerformanceLevel::Excellent);
        assert_eq!(PerformanceLevel::from_score(5.2), PerformanceLevel::VeryGood);
        assert_eq!(PerformanceLevel::from_score(4.0), PerformanceLevel::Good);
        assert_eq!(PerformanceLevel::from_score(3.9), PerformanceLevel::Average);
        assert_eq!(PerformanceLevel::from_score(2.0), PerformanceLevel::Weak);
        assert_eq!(PerformanceLevel::from_score(1.99), PerformanceLevel::Poor);
    }

    #[test]
    fn class_stats_use_population_spread() {
        let stats = ClassStats::from_scores(&[2.0, 4.0, 4.0, 6.0]).unwrap();
        assert_relative_eq!(stats.mean, 4.0);
        assert_relative_eq!(stats.median, 4.0);
        assert_relative_eq!(stats.std, 2.0_f64.sqrt());
        assert_eq!((stats.min, stats.max), (2.0, 6.0));
        assert!(ClassStats::from_scores(&[]).is_none());
    }

    #[test]
    fn class_lists_failures_and_orders_attention() {
        let students: Vec<String> = ["SV00", "SV01", "SV02", "SV03", "GHOST"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let class = analyze_class(fixtures::trained(), &students, "Nguyen Van A", "INF0263");
        assert_eq!(class.entries.len(), 4);
        assert_eq!(class.failed.len(), 1);
        assert_eq!(class.failed[0].0, "GHOST");
        assert_eq!(class.distribution.values().sum::<usize>(), 4);
        assert!(class
            .attention
            .windows(2)
            .all(|w| w[0].predicted_score <= w[1].predicted_score));
        assert!(class.attention.iter().all(|e| e.predicted_score < ATTENTION_SCORE));
        assert!((0.0..=1.0).contains(&class.pass_rate));
        assert!(class.excellent_rate <= class.pass_rate);
        assert_eq!(class.stats.as_ref().unwrap().count, 4);
    }
}
