use serde::{Deserialize, Serialize};

use crate::catalog::MethodCatalog;
use crate::config::{
    COMPREHENSIVE_REASON_COUNT, LOW_COMPATIBILITY, LOW_DIVERSITY, LOW_EFFECTIVENESS_SCORE, LOW_PASS_RATE,
    LOW_SCORE_THRESHOLD, MIN_ASSESSMENT_METHODS, NEW_LECTURER_MIN_STUDENTS, POSITIVE_SCORE, SEVERE_COMPATIBILITY,
};
use crate::models::{Factor, FactorScope, ReasonRecord, RecommendationRecord, Severity, StudentOfferingRecord};
use crate::ppdg::{AssessmentProfile, Rating};

const MAX_TEACHING_SUGGESTIONS: usize = 3;
const MAX_COMPATIBILITY_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub records: usize,
    pub passed: usize,
    pub avg_score: f64,
    pub pass_rate: f64,
}

impl GroupStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a StudentOfferingRecord>) -> Option<Self> {
        let (count, passed, total) = records.into_iter().fold((0usize, 0usize, 0.0), |(n, p, s), r| {
            (n + 1, p + usize::from(r.passed), s + r.exam_score_6)
        });
        (count > 0).then(|| Self {
            records: count,
            passed,
            avg_score: total / count as f64,
            pass_rate: passed as f64 / count as f64,
        })
    }
}

/// Historical statistics around one (student, lecturer, subject) request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub student: Option<GroupStats>,
    pub lecturer: Option<GroupStats>,
    pub subject: Option<GroupStats>,
    pub student_lecturer: Option<GroupStats>,
    pub student_subject: Option<GroupStats>,
}

impl AnalysisContext {
    /// Lecturer names are compared case-insensitively.
    pub fn gather(records: &[StudentOfferingRecord], student: &str, lecturer: &str, subject: &str) -> Self {
        let lecturer = lecturer.to_lowercase();
        let same_lecturer = |r: &&StudentOfferingRecord| r.lecturer_name.to_lowercase() == lecturer;
        let of_student: Vec<&StudentOfferingRecord> = records.iter().filter(|r| r.student_id == student).collect();
        Self {
            student: GroupStats::from_records(of_student.iter().copied()),
            lecturer: GroupStats::from_records(records.iter().filter(same_lecturer)),
            subject: GroupStats::from_records(records.iter().filter(|r| r.subject_id == subject)),
            student_lecturer: GroupStats::from_records(of_student.iter().copied().filter(same_lecturer)),
            student_subject: GroupStats::from_records(of_student.iter().copied().filter(|r| r.subject_id == subject)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub reasons: Vec<ReasonRecord>,
    pub recommendations: Vec<RecommendationRecord>,
}

fn reason(factor: Factor, reason: impl Into<String>, detail: impl Into<String>, severity: Severity) -> ReasonRecord {
    ReasonRecord {
        factor,
        reason: reason.into(),
        detail: detail.into(),
        severity,
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

pub fn find_reasons(
    ctx: &AnalysisContext,
    lecturer: &str,
    subject: &str,
    predicted_score: f64,
    profile: Option<&AssessmentProfile>,
) -> Vec<ReasonRecord> {
    let mut reasons = Vec::new();

    if let Some(student) = &ctx.student {
        if student.avg_score < LOW_SCORE_THRESHOLD {
            reasons.push(reason(
                Factor::StudentScore,
                "Student's average CLO score is low",
                format!("Average score: {:.2}/6 (below 3.5 threshold)", student.avg_score),
                Severity::High,
            ));
        }
        if student.pass_rate < LOW_PASS_RATE {
            reasons.push(reason(
                Factor::StudentPassRate,
                "Student's course pass rate is low",
                format!("Pass rate: {} (below 70%)", percent(student.pass_rate)),
                Severity::High,
            ));
        }
    }

    match &ctx.lecturer {
        Some(stats) => {
            let is_new = stats.records < NEW_LECTURER_MIN_STUDENTS;
            let severity = if is_new { Severity::Medium } else { Severity::High };
            if is_new {
                reasons.push(reason(
                    Factor::NewLecturer,
                    "New lecturer with limited teaching experience",
                    format!(
                        "Lecturer has only {} students (fewer than {NEW_LECTURER_MIN_STUDENTS})",
                        stats.records
                    ),
                    Severity::Medium,
                ));
            }
            if stats.avg_score < LOW_SCORE_THRESHOLD {
                let mut text = String::from("Lecturer's average CLO score is low");
                if is_new {
                    text.push_str(" (possibly due to limited experience)");
                }
                reasons.push(reason(
                    Factor::LecturerScore,
                    text,
                    format!("Average score: {:.2}/6 (below 3.5 threshold)", stats.avg_score),
                    severity,
                ));
            }
            if stats.pass_rate < LOW_PASS_RATE {
                let mut text = String::from("Lecturer's course pass rate is low");
                if is_new {
                    text.push_str(" (teaching methods may not yet be effective)");
                }
                reasons.push(reason(
                    Factor::LecturerPassRate,
                    text,
                    format!("Pass rate: {} (below 70%)", percent(stats.pass_rate)),
                    severity,
                ));
            }
        }
        None => reasons.push(reason(
            Factor::NewLecturer,
            "New lecturer with no teaching records",
            "No prior teaching records found for this lecturer",
            Severity::Medium,
        )),
    }

    if let Some(stats) = &ctx.subject {
        if stats.avg_score < LOW_SCORE_THRESHOLD {
            reasons.push(reason(
                Factor::SubjectScore,
                "Subject has a low average CLO score",
                format!("Average score for {subject}: {:.2}/6 (below 3.5 threshold)", stats.avg_score),
                Severity::Medium,
            ));
        }
        if stats.pass_rate < LOW_PASS_RATE {
            reasons.push(reason(
                Factor::SubjectPassRate,
                "Subject has a low pass rate",
                format!("Pass rate for {subject}: {} (below 70%)", percent(stats.pass_rate)),
                Severity::Medium,
            ));
        }
    }

    if let Some(stats) = ctx.student_lecturer.as_ref().filter(|s| s.avg_score < LOW_SCORE_THRESHOLD) {
        reasons.push(reason(
            Factor::StudentLecturerHistory,
            "Student has performed poorly with this lecturer",
            format!("Average score with lecturer {lecturer}: {:.2}/6", stats.avg_score),
            Severity::High,
        ));
    }
    if let Some(stats) = ctx.student_subject.as_ref().filter(|s| s.avg_score < LOW_SCORE_THRESHOLD) {
        reasons.push(reason(
            Factor::StudentSubjectHistory,
            "Student has performed poorly in this subject",
            format!("Average score in {subject}: {:.2}/6", stats.avg_score),
            Severity::High,
        ));
    }

    if let Some(profile) = profile {
        reasons.extend(assessment_reasons(profile, predicted_score));
    }
    reasons
}

fn assessment_reasons(profile: &AssessmentProfile, predicted_score: f64) -> Vec<ReasonRecord> {
    let mut reasons = Vec::new();
    if profile.total < MIN_ASSESSMENT_METHODS {
        reasons.push(reason(
            Factor::AssessmentCount,
            "Assessment methods are not diverse enough",
            format!(
                "Only {} assessment methods in use (recommended: at least 5-6)",
                profile.total
            ),
            Severity::Medium,
        ));
    }
    if profile.diversity < LOW_DIVERSITY {
        reasons.push(reason(
            Factor::AssessmentDiversity,
            "Low assessment diversity score",
            format!("Diversity score: {:.1}/10 (needs improvement)", profile.diversity),
            Severity::Medium,
        ));
    }
    if predicted_score < LOW_EFFECTIVENESS_SCORE && profile.effectiveness == Rating::Low {
        reasons.push(reason(
            Factor::AssessmentEffectiveness,
            "Assessment methods are not effective",
            format!(
                "Current assessment methods show low effectiveness at predicted score {predicted_score:.2}/6"
            ),
            Severity::High,
        ));
    }
    if profile.formative == 0 {
        reasons.push(reason(
            Factor::MissingFormative,
            "No formative assessment",
            "No formative assessment methods in use (EM1-5)",
            Severity::Medium,
        ));
    }
    if profile.summative == 0 {
        reasons.push(reason(
            Factor::MissingSummative,
            "No summative assessment",
            "No summative assessment methods in use (EM6-12)",
            Severity::Medium,
        ));
    }
    let compat = &profile.compatibility;
    if compat.score < LOW_COMPATIBILITY {
        reasons.push(reason(
            Factor::MethodCompatibility,
            "Assessment methods do not match the teaching methods",
            format!(
                "Compatibility score: {:.1}/10 - {}/{} methods compatible",
                compat.score, compat.compatible, compat.total
            ),
            Severity::Medium,
        ));
    }
    reasons
}

fn canned_suggestions(scope: FactorScope) -> &'static [&'static str] {
    match scope {
        FactorScope::Lecturer => &[
            "Strengthen teaching-method training for new lecturers",
            "Apply modern interactive teaching methods",
            "Increase practice and real-world exercises",
        ],
        FactorScope::Subject => &[
            "Improve course content structure",
            "Strengthen the link between theory and practice",
            "Apply active learning methods",
        ],
        FactorScope::Student => &[
            "Adapt teaching to the student's level",
            "Increase individual support and guidance",
            "Apply differentiated instruction",
        ],
        FactorScope::Assessment => &[],
    }
}

/// Clauses of the assessment-specific recommendation, in presentation order.
pub fn assessment_clauses(profile: &AssessmentProfile, predicted_score: f64, catalog: &MethodCatalog) -> Vec<String> {
    let mut clauses = Vec::new();

    let mut to_add: Vec<&str> = Vec::new();
    if profile.formative == 0 {
        to_add.extend(["EM1", "EM2", "EM3"]);
    }
    if profile.summative == 0 {
        to_add.extend(["EM6", "EM7", "EM8"]);
    }
    if profile.practical == 0 {
        to_add.extend(["EM4", "EM5"]);
    }
    if !to_add.is_empty() {
        let ordered: Vec<String> = catalog
            .assessment_codes()
            .filter(|code| to_add.contains(code))
            .map(|code| catalog.describe(code))
            .collect();
        clauses.push(format!("ADD: {}", ordered.join(", ")));
    }

    let mut improve = Vec::new();
    if profile.diversity < LOW_DIVERSITY {
        improve.push("Increase assessment diversity".to_string());
    }
    if profile.effectiveness == Rating::Low {
        improve.push("Improve assessment effectiveness".to_string());
    }
    let compat = &profile.compatibility;
    if compat.score < LOW_COMPATIBILITY && !compat.incompatible.is_empty() {
        improve.push(format!("Adjust incompatible methods: {}", compat.incompatible.join(", ")));
    }
    if !improve.is_empty() {
        clauses.push(format!("IMPROVE: {}", improve.join(" | ")));
    }

    let mut remove = Vec::new();
    if profile.effectiveness == Rating::Low && predicted_score < LOW_SCORE_THRESHOLD {
        remove.push("Consider removing low-effectiveness methods");
    }
    if compat.score < SEVERE_COMPATIBILITY {
        remove.push("Remove methods incompatible with the teaching methods");
    }
    if !remove.is_empty() {
        clauses.push(format!("REMOVE: {}", remove.join(" | ")));
    }

    if predicted_score < LOW_EFFECTIVENESS_SCORE {
        if profile.total < MIN_ASSESSMENT_METHODS {
            clauses.push("COUNT: at least 5-6 methods for a comprehensive assessment".to_string());
        }
        if profile.formative < 2 {
            clauses.push("FORMATIVE: at least 2 formative methods".to_string());
        }
        if profile.summative < 2 {
            clauses.push("SUMMATIVE: at least 2 summative methods".to_string());
        }
    }

    let compatibility: Vec<String> = profile
        .teaching_improvements
        .iter()
        .take(MAX_COMPATIBILITY_SUGGESTIONS)
        .map(|t| t.short_label())
        .collect();
    if !compatibility.is_empty() {
        clauses.push(format!("COMPATIBILITY: {}", compatibility.join(" | ")));
    }
    clauses
}

pub fn rule_recommendations(
    reasons: &[ReasonRecord],
    predicted_score: f64,
    profile: Option<&AssessmentProfile>,
    catalog: &MethodCatalog,
) -> Vec<RecommendationRecord> {
    let mut recommendations = Vec::new();
    if reasons.is_empty() {
        if predicted_score >= POSITIVE_SCORE {
            recommendations.push(RecommendationRecord {
                category: "overall".into(),
                title: "Predicted result is good".into(),
                detail: format!("Predicted score: {predicted_score:.2}/6"),
                suggestion: "Teaching approach and assessment are sound; no remediation needed".into(),
                priority: Severity::Low,
            });
        }
        return recommendations;
    }

    let top_severity = reasons.iter().map(|r| r.severity).min().unwrap_or(Severity::Medium);
    let mut suggestions: Vec<&str> = Vec::new();
    for scope in [FactorScope::Lecturer, FactorScope::Subject, FactorScope::Student] {
        if reasons.iter().any(|r| r.factor.scope() == scope) {
            suggestions.extend(canned_suggestions(scope));
        }
    }
    if !suggestions.is_empty() {
        suggestions.truncate(MAX_TEACHING_SUGGESTIONS);
        recommendations.push(RecommendationRecord {
            category: "teaching_improvement".into(),
            title: "Teaching method (PPGD) improvements".into(),
            detail: format!("Based on {} low-score reasons found", reasons.len()),
            suggestion: suggestions.join(" | "),
            priority: top_severity,
        });
    }

    if let Some(profile) = profile {
        let clauses = assessment_clauses(profile, predicted_score, catalog);
        let suggestion = if clauses.is_empty() {
            "No specific recommendation".to_string()
        } else {
            clauses.join(" | ")
        };
        recommendations.push(RecommendationRecord {
            category: "assessment_specific_improvement".into(),
            title: "Specific assessment (PPDG) improvements".into(),
            detail: format!("Predicted score: {predicted_score:.2}/6 - detailed assessment analysis"),
            suggestion,
            priority: if profile.effectiveness == Rating::Low {
                Severity::High
            } else {
                Severity::Medium
            },
        });
    }

    if reasons.len() >= COMPREHENSIVE_REASON_COUNT {
        recommendations.push(RecommendationRecord {
            category: "comprehensive_improvement".into(),
            title: "Comprehensive improvement".into(),
            detail: "Both teaching and assessment methods need work to raise learning outcomes".into(),
            suggestion: "Combine better teaching methods with more varied assessment".into(),
            priority: Severity::High,
        });
    }
    recommendations
}

/// Runs the rule set in order and derives the rule-based recommendations.
pub fn analyze(
    ctx: &AnalysisContext,
    lecturer: &str,
    subject: &str,
    predicted_score: f64,
    profile: Option<&AssessmentProfile>,
    catalog: &MethodCatalog,
) -> Analysis {
    let reasons = find_reasons(ctx, lecturer, subject, predicted_score, profile);
    let recommendations = rule_recommendations(&reasons, predicted_score, profile, catalog);
    Analysis {
        reasons,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::offering;
    use std::collections::BTreeSet;

    fn stats(records: usize, avg_score: f64, pass_rate: f64) -> Option<GroupStats> {
        Some(GroupStats {
            records,
            passed: (records as f64 * pass_rate).round() as usize,
            avg_score,
            pass_rate,
        })
    }

    fn profile(codes: &[&str], score: f64) -> AssessmentProfile {
        let used: BTreeSet<String> = codes.iter().map(|c| c.to_string()).collect();
        AssessmentProfile::analyze("INF0263", &used, &MethodCatalog.default_teaching(), score, &MethodCatalog)
    }

    #[test]
    fn context_matches_lecturer_case_insensitively() {
        let records = vec![
            offering("S1", "Nguyen Van A", "INF0263", (2021, 1), 2.0, false),
            offering("S2", "nguyen van a", "INF0263", (2021, 1), 5.0, true),
            offering("S1", "Tran Thi B", "MAT0001", (2021, 2), 4.0, true),
        ];
        let ctx = AnalysisContext::gather(&records, "S1", "NGUYEN VAN A", "MAT0001");
        assert_eq!(ctx.lecturer.as_ref().unwrap().records, 2);
        assert_eq!(ctx.student_lecturer.as_ref().unwrap().records, 1);
        assert_eq!(ctx.student_subject.as_ref().unwrap().avg_score, 4.0);
        assert_eq!(ctx.student.as_ref().unwrap().pass_rate, 0.5);
    }

    #[test]
    fn weak_student_and_new_lecturer() {
        let ctx = AnalysisContext {
            student: stats(4, 3.0, 0.5),
            lecturer: stats(5, 3.0, 0.8),
            ..AnalysisContext::default()
        };
        let reasons = find_reasons(&ctx, "Tran Thi B", "MAT0001", 2.0, None);
        let high = reasons.iter().filter(|r| r.severity == Severity::High).count();
        assert_eq!(high, 2);
        assert!(reasons.iter().any(|r| r.factor == Factor::NewLecturer));
        let lecturer_score = reasons.iter().find(|r| r.factor == Factor::LecturerScore).unwrap();
        assert_eq!(lecturer_score.severity, Severity::Medium);
        assert!(lecturer_score.reason.ends_with("(possibly due to limited experience)"));
        assert_eq!(reasons[1].detail, "Pass rate: 50.0% (below 70%)");
    }

    #[test]
    fn unknown_lecturer_is_flagged_as_new() {
        let reasons = find_reasons(&AnalysisContext::default(), "Nobody", "MAT0001", 5.0, None);
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].factor, Factor::NewLecturer);
        assert_eq!(reasons[0].severity, Severity::Medium);
    }

    #[test]
    fn good_prediction_without_reasons_is_positive() {
        let recs = rule_recommendations(&[], 5.0, None, &MethodCatalog);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].category, "overall");
        assert!(rule_recommendations(&[], 4.0, None, &MethodCatalog).is_empty());
    }

    #[test]
    fn teaching_suggestions_cap_at_three() {
        let ctx = AnalysisContext {
            student: stats(10, 2.0, 0.3),
            lecturer: stats(40, 2.5, 0.5),
            subject: stats(40, 2.5, 0.5),
            ..AnalysisContext::default()
        };
        let analysis = analyze(&ctx, "Le Van C", "MAT0001", 1.5, None, &MethodCatalog);
        let teaching = analysis
            .recommendations
            .iter()
            .find(|r| r.category == "teaching_improvement")
            .unwrap();
        assert_eq!(teaching.suggestion.split(" | ").count(), 3);
        assert!(teaching.suggestion.starts_with("Strengthen teaching-method training"));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.category == "comprehensive_improvement"));
    }

    #[test]
    fn sparse_assessment_yields_specific_clauses() {
        let profile = profile(&["EM6"], 2.0);
        let reasons = assessment_reasons(&profile, 2.0);
        let factors: Vec<Factor> = reasons.iter().map(|r| r.factor).collect();
        assert_eq!(
            factors,
            vec![
                Factor::AssessmentCount,
                Factor::AssessmentDiversity,
                Factor::AssessmentEffectiveness,
                Factor::MissingFormative,
            ]
        );

        let clauses = assessment_clauses(&profile, 2.0, &MethodCatalog);
        assert!(clauses[0].starts_with("ADD: EM1 (Attendance And Punctuality Assessment)"));
        assert!(clauses[0].contains("EM5"));
        assert!(!clauses[0].contains("EM6"));
        assert!(clauses.iter().any(|c| c.starts_with("IMPROVE: Increase assessment diversity")));
        assert!(clauses.iter().any(|c| c == "REMOVE: Consider removing low-effectiveness methods"));
        assert!(clauses.iter().any(|c| c.starts_with("COUNT:")));
        assert!(clauses.iter().any(|c| c.starts_with("COMPATIBILITY: Add EM1")));
    }

    #[test]
    fn incompatible_methods_are_named() {
        let profile = profile(&["EM9", "EM10", "EM6"], 4.2);
        assert!(profile.compatibility.score < SEVERE_COMPATIBILITY);
        let reasons = assessment_reasons(&profile, 4.2);
        assert!(reasons.iter().any(|r| r.factor == Factor::MethodCompatibility
            && r.detail == "Compatibility score: 3.3/10 - 1/3 methods compatible"));
        let clauses = assessment_clauses(&profile, 4.2, &MethodCatalog);
        assert!(clauses.iter().any(|c| c.contains("Adjust incompatible methods: EM9, EM10")));
        assert!(clauses.iter().any(|c| c == "REMOVE: Remove methods incompatible with the teaching methods"));
    }
}
