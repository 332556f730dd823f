use std::collections::HashSet;

use crate::config::{MAX_RECOMMENDATIONS, SCORE_SCALE};
use crate::exemplar::{DomainKey, ExemplarPrediction};
use crate::models::{FactorScope, ReasonRecord, RecommendationRecord};

/// Normalized per-request inputs for the exemplar models, each in `0..=1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExemplarSignals {
    pub predicted_score: f64,
    pub diversity: Option<f64>,
    pub compatibility: Option<f64>,
    pub latest_conduct: Option<f64>,
    pub recent_avg_score: Option<f64>,
}

impl ExemplarSignals {
    /// Feature vector for `key`, or `None` when the request carries no signal for it.
    pub fn features(&self, key: DomainKey) -> Option<Vec<f64>> {
        let value = match key {
            DomainKey::CloAttendance => Some(self.predicted_score / SCORE_SCALE),
            DomainKey::EvaluationMethods => self.diversity.map(|d| d / 10.0),
            DomainKey::TeachingMethods => self.compatibility.map(|c| c / 10.0),
            DomainKey::StudentConduct => self.latest_conduct.map(|c| c / 100.0),
            DomainKey::AcademicMidterm => self.recent_avg_score.map(|s| s / SCORE_SCALE),
            DomainKey::SelfStudy => return Some(Vec::new()),
        };
        value.map(|v| vec![v])
    }
}

fn domains_for(scope: FactorScope) -> &'static [DomainKey] {
    match scope {
        FactorScope::Student => &[
            DomainKey::CloAttendance,
            DomainKey::AcademicMidterm,
            DomainKey::StudentConduct,
            DomainKey::SelfStudy,
        ],
        FactorScope::Lecturer => &[DomainKey::TeachingMethods],
        FactorScope::Subject => &[DomainKey::TeachingMethods, DomainKey::EvaluationMethods],
        FactorScope::Assessment => &[DomainKey::EvaluationMethods, DomainKey::TeachingMethods],
    }
}

/// Domains touched by the fired reasons, in first-seen order.
pub fn relevant_domains(reasons: &[ReasonRecord]) -> Vec<DomainKey> {
    let mut domains = Vec::new();
    for reason in reasons {
        for &key in domains_for(reason.factor.scope()) {
            if !domains.contains(&key) {
                domains.push(key);
            }
        }
    }
    domains
}

pub fn exemplar_records(prediction: &ExemplarPrediction) -> Vec<RecommendationRecord> {
    prediction
        .rows
        .iter()
        .map(|row| RecommendationRecord {
            category: format!("exemplar:{}", prediction.domain),
            title: prediction.domain.description().to_string(),
            detail: row.reason.clone(),
            suggestion: row.solution.clone(),
            priority: prediction.severity,
        })
        .collect()
}

/// Merges rule-based and exemplar recommendations.
///
/// Rule records precede exemplar records; duplicates by case-folded (category, title,
/// suggestion) keep their first occurrence; the stable sort keeps insertion order within a
/// priority.
pub fn synthesize(rules: Vec<RecommendationRecord>, exemplars: &[ExemplarPrediction]) -> Vec<RecommendationRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<RecommendationRecord> = rules
        .into_iter()
        .chain(exemplars.iter().flat_map(exemplar_records))
        .filter(|rec| {
            seen.insert((
                rec.category.to_lowercase(),
                rec.title.to_lowercase(),
                rec.suggestion.to_lowercase(),
            ))
        })
        .collect();
    merged.sort_by_key(|rec| rec.priority);
    merged.truncate(MAX_RECOMMENDATIONS);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exemplar::ExemplarRow;
    use crate::models::{Factor, Severity};

    fn rec(category: &str, title: &str, suggestion: &str, priority: Severity) -> RecommendationRecord {
        RecommendationRecord {
            category: category.into(),
            title: title.into(),
            detail: String::new(),
            suggestion: suggestion.into(),
            priority,
        }
    }

    fn reason(factor: Factor) -> ReasonRecord {
        ReasonRecord {
            factor,
            reason: String::new(),
            detail: String::new(),
            severity: Severity::Medium,
        }
    }

    #[test]
    fn duplicates_collapse_case_insensitively() {
        let merged = synthesize(
            vec![
                rec("overall", "Good", "Keep going", Severity::Low),
                rec("Overall", "GOOD", "keep going", Severity::High),
                rec("overall", "Good", "Keep going!", Severity::Medium),
            ],
            &[],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].suggestion, "Keep going!");
        assert_eq!(merged[1].priority, Severity::Low);
    }

    #[test]
    fn ordering_is_stable_and_capped() {
        let rules: Vec<RecommendationRecord> = (0..20)
            .map(|i| {
                let priority = if i % 2 == 0 { Severity::Low } else { Severity::High };
                rec("rule", &format!("r{i}"), "s", priority)
            })
            .collect();
        let merged = synthesize(rules, &[]);
        assert_eq!(merged.len(), MAX_RECOMMENDATIONS);
        let titles: Vec<&str> = merged.iter().take(3).map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["r1", "r3", "r5"]);
        assert!(merged.windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[test]
    fn exemplar_rows_follow_rule_records() {
        let prediction = ExemplarPrediction {
            domain: DomainKey::CloAttendance,
            severity: Severity::Medium,
            confidence: 0.8,
            rows: vec![ExemplarRow {
                score: Some(0.4),
                severity: Severity::Medium,
                reason: "Irregular attendance".into(),
                solution: "Track attendance weekly".into(),
                problem_type: None,
                audience: None,
            }],
        };
        let merged = synthesize(vec![rec("teaching_improvement", "t", "s", Severity::Medium)], &[prediction]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].category, "exemplar:clo_attendance");
        assert_eq!(merged[1].suggestion, "Track attendance weekly");
    }

    #[test]
    fn domains_follow_reason_scopes() {
        let domains = relevant_domains(&[reason(Factor::SubjectScore), reason(Factor::MissingFormative)]);
        assert_eq!(domains, vec![DomainKey::TeachingMethods, DomainKey::EvaluationMethods]);
        let student = relevant_domains(&[reason(Factor::StudentPassRate)]);
        assert_eq!(student.len(), 4);
        assert!(relevant_domains(&[]).is_empty());
    }

    #[test]
    fn signals_are_normalized() {
        let signals = ExemplarSignals {
            predicted_score: 3.0,
            diversity: Some(5.0),
            compatibility: None,
            latest_conduct: Some(80.0),
            recent_avg_score: Some(4.5),
        };
        assert_eq!(signals.features(DomainKey::CloAttendance), Some(vec![0.5]));
        assert_eq!(signals.features(DomainKey::EvaluationMethods), Some(vec![0.5]));
        assert_eq!(signals.features(DomainKey::TeachingMethods), None);
        assert_eq!(signals.features(DomainKey::StudentConduct), Some(vec![0.8]));
        assert_eq!(signals.features(DomainKey::AcademicMidterm), Some(vec![0.75]));
        assert_eq!(signals.features(DomainKey::SelfStudy), Some(Vec::new()));
    }
}
