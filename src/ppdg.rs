//! Assessment-method (PPDG) profile of a subject: diversity, compatibility with the
//! teaching methods in use, and the improvements that follow from both.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::MethodCatalog;
use crate::config::{LOW_COMPATIBILITY, LOW_DIVERSITY, MIN_ASSESSMENT_METHODS, POSITIVE_SCORE};
use crate::models::Severity;

const MEDIUM_EFFECTIVENESS_SCORE: f64 = 3.6;
const HIGH_COMPATIBILITY: f64 = 8.0;
const MAX_DIVERSITY: f64 = 10.0;
const CORE_METHODS: &[&str] = &["EM1", "EM2", "EM3", "EM4", "EM5", "EM8", "EM11"];
const MAX_CORE_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rating {
    High,
    Medium,
    Low,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rating::High => "HIGH",
            Rating::Medium => "MEDIUM",
            Rating::Low => "LOW",
        })
    }
}

pub fn effectiveness(predicted_score: f64) -> Rating {
    if predicted_score >= POSITIVE_SCORE {
        Rating::High
    } else if predicted_score >= MEDIUM_EFFECTIVENESS_SCORE {
        Rating::Medium
    } else {
        Rating::Low
    }
}

pub fn compatibility_level(score: f64) -> Rating {
    if score >= HIGH_COMPATIBILITY {
        Rating::High
    } else if score >= LOW_COMPATIBILITY {
        Rating::Medium
    } else {
        Rating::Low
    }
}

/// Catalog assessment codes present in `used`, in catalog order.
fn ordered_used(used: &BTreeSet<String>, catalog: &MethodCatalog) -> Vec<&'static str> {
    catalog.assessment_codes().filter(|code| used.contains(*code)).collect()
}

/// 0-10 score rewarding method count, formative/summative balance and skill-building methods.
pub fn diversity_score(used: &BTreeSet<String>, catalog: &MethodCatalog) -> f64 {
    let codes = ordered_used(used, catalog);
    if codes.is_empty() {
        return 0.0;
    }
    let base = (1.5 * codes.len() as f64).min(6.0);
    let formative = codes.iter().filter(|c| catalog.is_formative(c)).count();
    let summative = codes.len() - formative;
    let balance = if formative > 0 && summative > 0 {
        2.0
    } else if formative >= 3 {
        1.5
    } else if summative >= 2 {
        1.0
    } else {
        0.0
    };
    let skill = 0.5 * codes.iter().filter(|c| catalog.is_skill_developing(c)).count() as f64;
    (base + balance + skill).min(MAX_DIVERSITY)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub score: f64,
    pub level: Rating,
    pub compatible: usize,
    pub total: usize,
    pub incompatible: Vec<String>,
}

/// A used assessment method is compatible when one of its mapped teaching methods is in use.
pub fn compatibility(used: &BTreeSet<String>, teaching: &BTreeSet<String>, catalog: &MethodCatalog) -> Compatibility {
    let codes = ordered_used(used, catalog);
    let mut incompatible = Vec::new();
    for code in &codes {
        let supported = catalog
            .compatible_teaching(code)
            .iter()
            .any(|tm| teaching.contains(*tm));
        if !supported {
            incompatible.push(code.to_string());
        }
    }
    let compatible = codes.len() - incompatible.len();
    let score = if codes.is_empty() {
        0.0
    } else {
        compatible as f64 / codes.len() as f64 * 10.0
    };
    Compatibility {
        score,
        level: compatibility_level(score),
        compatible,
        total: codes.len(),
        incompatible,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TeachingImprovement {
    /// An assessment method in use lacks any supporting teaching method.
    AddTeachingMethod {
        assessment: String,
        suggested: Vec<String>,
        priority: Severity,
    },
    /// An unused assessment method that the current teaching methods already support.
    AddAssessmentMethod {
        assessment: String,
        supported_by: Vec<String>,
        priority: Severity,
    },
}

impl TeachingImprovement {
    pub fn priority(&self) -> Severity {
        match self {
            TeachingImprovement::AddTeachingMethod { priority, .. }
            | TeachingImprovement::AddAssessmentMethod { priority, .. } => *priority,
        }
    }

    pub fn short_label(&self) -> String {
        match self {
            TeachingImprovement::AddTeachingMethod { assessment, .. } => format!("Add TM for {assessment}"),
            TeachingImprovement::AddAssessmentMethod { assessment, .. } => format!("Add {assessment}"),
        }
    }
}

impl fmt::Display for TeachingImprovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeachingImprovement::AddTeachingMethod {
                assessment,
                suggested,
                ..
            } => write!(f, "Add teaching methods for {assessment}: {}", suggested.join(", ")),
            TeachingImprovement::AddAssessmentMethod {
                assessment,
                supported_by,
                ..
            } => write!(f, "Add {assessment}, suited to {}", supported_by.join(", ")),
        }
    }
}

fn teaching_improvements(
    used: &BTreeSet<String>,
    teaching: &BTreeSet<String>,
    compat: &Compatibility,
    catalog: &MethodCatalog,
) -> Vec<TeachingImprovement> {
    let mut improvements = Vec::new();
    for code in &compat.incompatible {
        let suggested: Vec<String> = catalog
            .compatible_teaching(code)
            .iter()
            .map(|tm| catalog.describe(tm))
            .collect();
        if suggested.is_empty() {
            continue;
        }
        let priority = if matches!(code.as_str(), "EM1" | "EM2" | "EM3") {
            Severity::High
        } else {
            Severity::Medium
        };
        improvements.push(TeachingImprovement::AddTeachingMethod {
            assessment: code.clone(),
            suggested,
            priority,
        });
    }

    let mut missing: Vec<(&'static str, Vec<String>)> = Vec::new();
    for tm in teaching {
        for em in catalog.assessment_codes() {
            if used.contains(em) || !catalog.compatible_teaching(em).contains(&tm.as_str()) {
                continue;
            }
            match missing.iter_mut().find(|(code, _)| *code == em) {
                Some((_, tms)) => tms.push(catalog.describe(tm)),
                None => missing.push((em, vec![catalog.describe(tm)])),
            }
        }
    }
    improvements.extend(missing.into_iter().map(|(em, supported_by)| {
        TeachingImprovement::AddAssessmentMethod {
            assessment: em.to_string(),
            supported_by,
            priority: Severity::Medium,
        }
    }));
    improvements
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub text: String,
    pub priority: Severity,
}

impl Improvement {
    fn new(text: impl Into<String>, priority: Severity) -> Self {
        Self {
            text: text.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentProfile {
    pub subject: String,
    pub used: Vec<String>,
    pub teaching: Vec<String>,
    pub total: usize,
    pub formative: usize,
    pub summative: usize,
    pub practical: usize,
    pub diversity: f64,
    pub effectiveness: Rating,
    pub compatibility: Compatibility,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub teaching_improvements: Vec<TeachingImprovement>,
    pub improvements: Vec<Improvement>,
}

impl AssessmentProfile {
    pub fn analyze(
        subject: &str,
        used: &BTreeSet<String>,
        teaching: &BTreeSet<String>,
        predicted_score: f64,
        catalog: &MethodCatalog,
    ) -> Self {
        let codes = ordered_used(used, catalog);
        let formative = codes.iter().filter(|c| catalog.is_formative(c)).count();
        let practical = codes.iter().filter(|c| catalog.is_practical(c)).count();
        let compat = compatibility(used, teaching, catalog);
        let mut profile = Self {
            subject: subject.to_string(),
            used: codes.iter().map(|c| c.to_string()).collect(),
            teaching: teaching.iter().cloned().collect(),
            total: codes.len(),
            formative,
            summative: codes.len() - formative,
            practical,
            diversity: diversity_score(used, catalog),
            effectiveness: effectiveness(predicted_score),
            teaching_improvements: teaching_improvements(used, teaching, &compat, catalog),
            compatibility: compat,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            improvements: Vec::new(),
        };
        profile.assess_strengths(predicted_score, catalog);
        profile.improvements = profile.improvement_list(predicted_score, catalog);
        profile
    }

    pub fn uses(&self, code: &str) -> bool {
        self.used.iter().any(|c| c == code)
    }

    fn assess_strengths(&mut self, predicted_score: f64, catalog: &MethodCatalog) {
        if self.total >= 6 {
            self.strengths.push("Uses a wide variety of assessment methods".into());
        } else if self.total <= 3 {
            self.weaknesses.push("Few assessment methods in use; little variety".into());
        }

        if self.formative >= 3 && self.summative >= 2 {
            self.strengths
                .push("Good balance between formative and summative assessment".into());
        } else if self.formative < 2 {
            self.weaknesses
                .push("Too little formative assessment; students are rarely monitored continuously".into());
        } else if self.summative < 1 {
            self.weaknesses
                .push("No summative assessment; hard to evaluate students comprehensively".into());
        }

        let skill = self.used.iter().filter(|c| catalog.is_skill_developing(c)).count();
        if skill >= 2 {
            self.strengths.push("Several methods develop practical skills".into());
        } else if skill == 0 {
            self.weaknesses.push("No methods that develop practical skills".into());
        }

        if predicted_score < MEDIUM_EFFECTIVENESS_SCORE {
            if !self.uses("EM1") {
                self.weaknesses
                    .push("Missing attendance assessment (EM1), important for weaker students".into());
            }
            if !self.uses("EM2") {
                self.weaknesses
                    .push("Missing individual assignment assessment (EM2), which keeps students practising".into());
            }
        }
    }

    fn improvement_list(&self, predicted_score: f64, catalog: &MethodCatalog) -> Vec<Improvement> {
        let mut list = Vec::new();
        if self.total < MIN_ASSESSMENT_METHODS {
            list.push(Improvement::new(
                "Increase the number of assessment methods to at least 5-6",
                Severity::High,
            ));
        }
        if self.formative < 2 {
            list.push(Improvement::new(
                "Add more formative assessment (EM1, EM2, EM3, EM4, EM5)",
                Severity::High,
            ));
        }
        if self.summative < 2 {
            list.push(Improvement::new(
                "Add more summative assessment (EM6, EM7, EM8, EM11, EM12)",
                Severity::Medium,
            ));
        }
        if predicted_score < MEDIUM_EFFECTIVENESS_SCORE {
            if !self.uses("EM1") {
                list.push(Improvement::new(
                    "Add attendance assessment (EM1) to track participation",
                    Severity::High,
                ));
            }
            if !self.uses("EM2") {
                list.push(Improvement::new(
                    "Add individual assignment assessment (EM2) for regular practice",
                    Severity::High,
                ));
            }
            if !self.uses("EM3") {
                list.push(Improvement::new(
                    "Add presentation assessment (EM3) to build communication skills",
                    Severity::Medium,
                ));
            }
        }
        if self.diversity < LOW_DIVERSITY {
            list.push(Improvement::new(
                "Increase assessment variety for well-rounded development",
                Severity::Medium,
            ));
        }
        let missing: Vec<String> = CORE_METHODS
            .iter()
            .filter(|code| !self.uses(code))
            .take(MAX_CORE_SUGGESTIONS)
            .map(|code| catalog.describe(code))
            .collect();
        if !missing.is_empty() {
            list.push(Improvement::new(
                format!("Consider adding: {}", missing.join(", ")),
                Severity::Low,
            ));
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn set(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn diversity_components_add_up() {
        let catalog = MethodCatalog;
        assert_eq!(diversity_score(&set(&[]), &catalog), 0.0);
        // 2 methods: base 3, balance 2, EM4 skill 0.5
        assert_relative_eq!(diversity_score(&set(&["EM4", "EM6"]), &catalog), 5.5);
        // 3 formative only: base 4.5, balance 1.5, EM3 skill 0.5
        assert_relative_eq!(diversity_score(&set(&["EM1", "EM2", "EM3"]), &catalog), 6.5);
        assert_relative_eq!(
            diversity_score(&set(&["EM1", "EM3", "EM4", "EM6", "EM8", "EM11", "EM12"]), &catalog),
            10.0
        );
    }

    #[test]
    fn compatibility_counts_supported_methods() {
        let catalog = MethodCatalog;
        let compat = compatibility(&set(&["EM1", "EM4", "EM9"]), &set(&["TM2"]), &catalog);
        assert_eq!(compat.compatible, 1);
        assert_eq!(compat.incompatible, vec!["EM4".to_string(), "EM9".to_string()]);
        assert_relative_eq!(compat.score, 10.0 / 3.0);
        assert_eq!(compat.level, Rating::Low);
    }

    #[test]
    fn incompatible_methods_suggest_teaching_methods() {
        let catalog = MethodCatalog;
        let profile = AssessmentProfile::analyze("INF0263", &set(&["EM2", "EM6"]), &set(&["TM1"]), 3.0, &catalog);
        let first = &profile.teaching_improvements[0];
        assert_eq!(first.priority(), Severity::High);
        assert_eq!(first.short_label(), "Add TM for EM2");
        assert!(profile
            .teaching_improvements
            .iter()
            .any(|t| t.short_label() == "Add EM1"));
        assert_eq!(profile.effectiveness, Rating::Low);
        assert!(profile.improvements.iter().any(|i| i.text.contains("EM1") && i.priority == Severity::High));
        assert!(profile.weaknesses.iter().any(|w| w.contains("EM1")));
    }

    #[test]
    fn well_covered_subject_has_strengths() {
        let catalog = MethodCatalog;
        let used = set(&["EM1", "EM2", "EM3", "EM4", "EM6", "EM8"]);
        let profile = AssessmentProfile::analyze("PLO0043", &used, &catalog.default_teaching(), 5.0, &catalog);
        assert_eq!(profile.formative, 4);
        assert_eq!(profile.summative, 2);
        assert_eq!(profile.practical, 1);
        assert_eq!(profile.strengths.len(), 3);
        assert!(profile.weaknesses.is_empty());
        assert_eq!(profile.effectiveness, Rating::High);
    }

    fn code_subset() -> impl Strategy<Value = Vec<bool>> {
        prop::collection::vec(any::<bool>(), 13)
    }

    fn pick(mask: &[bool]) -> BTreeSet<String> {
        MethodCatalog
            .assessment_codes()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(code, _)| code.to_string())
            .collect()
    }

    proptest! {
        #[test]
        fn diversity_is_bounded_and_monotone(mask in code_subset(), extra in 0usize..13) {
            let catalog = MethodCatalog;
            let used = pick(&mask);
            let score = diversity_score(&used, &catalog);
            prop_assert!((0.0..=10.0).contains(&score));

            let mut more = used.clone();
            if let Some(code) = catalog.assessment_codes().nth(extra) {
                more.insert(code.to_string());
            }
            prop_assert!(diversity_score(&more, &catalog) >= score);
        }

        #[test]
        fn compatibility_extremes(mask in code_subset()) {
            let catalog = MethodCatalog;
            let used = pick(&mask);
            let none = compatibility(&used, &BTreeSet::new(), &catalog);
            prop_assert_eq!(none.score, 0.0);

            let mapped: BTreeSet<String> = used
                .iter()
                .filter(|c| !catalog.compatible_teaching(c).is_empty())
                .cloned()
                .collect();
            let all_teaching: BTreeSet<String> = catalog.teaching_codes().map(String::from).collect();
            let full = compatibility(&mapped, &all_teaching, &catalog);
            if mapped.is_empty() {
                prop_assert_eq!(full.score, 0.0);
            } else {
                prop_assert_eq!(full.score, 10.0);
            }
        }
    }
}
