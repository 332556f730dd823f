use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    pub year: i32,
    pub semester: i32,
}

impl Term {
    pub fn new(year: i32, semester: i32) -> Self {
        Self { year, semester }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/S{}", self.year, self.semester)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradeRow {
    pub student_id: String,
    pub lecturer_name: String,
    pub subject_id: String,
    #[serde(default)]
    pub exam_score: String,
    #[serde(default)]
    pub summary_score: String,
    pub year: i32,
    pub semester: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemographicRow {
    pub student_id: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub religion: String,
    #[serde(default)]
    pub birth_place: String,
    #[serde(default)]
    pub ethnicity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConductRow {
    pub student_id: String,
    pub school_year: i32,
    pub semester: i32,
    pub conduct_score: f64,
    #[serde(default)]
    pub classification: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelfStudyRow {
    pub student_id: String,
    pub year: i32,
    pub semester: i32,
    #[serde(default)]
    pub study_hours: f64,
    #[serde(default)]
    pub study_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentOfferingRecord {
    pub student_id: String,
    pub lecturer_name: String,
    pub subject_id: String,
    pub term: Term,
    pub raw_exam_score: String,
    pub raw_summary_score: String,
    pub exam_score_10: f64,
    pub exam_score_6: f64,
    pub summary_score: f64,
    pub absent_exam: bool,
    pub absent_summary: bool,
    pub passed: bool,
    pub clo_achieved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }

    /// Lenient parse used for corpus labels; accepts the Vietnamese labels as well.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" | "cao" | "critical" | "severe" => Some(Severity::High),
            "medium" | "moderate" | "trung bình" | "trung binh" => Some(Severity::Medium),
            "low" | "thấp" | "thap" | "mild" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorScope {
    Student,
    Lecturer,
    Subject,
    Assessment,
}

/// Serialized with the human-readable tag carried in prediction bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Factor {
    #[serde(rename = "student score")]
    StudentScore,
    #[serde(rename = "student pass rate")]
    StudentPassRate,
    #[serde(rename = "new lecturer")]
    NewLecturer,
    #[serde(rename = "lecturer score")]
    LecturerScore,
    #[serde(rename = "lecturer pass rate")]
    LecturerPassRate,
    #[serde(rename = "subject score")]
    SubjectScore,
    #[serde(rename = "subject pass rate")]
    SubjectPassRate,
    #[serde(rename = "student-lecturer history")]
    StudentLecturerHistory,
    #[serde(rename = "student-subject history")]
    StudentSubjectHistory,
    #[serde(rename = "assessment count")]
    AssessmentCount,
    #[serde(rename = "assessment diversity")]
    AssessmentDiversity,
    #[serde(rename = "assessment effectiveness")]
    AssessmentEffectiveness,
    #[serde(rename = "missing formative assessment")]
    MissingFormative,
    #[serde(rename = "missing summative assessment")]
    MissingSummative,
    #[serde(rename = "method compatibility")]
    MethodCompatibility,
}

impl Factor {
    pub fn scope(self) -> FactorScope {
        match self {
            Factor::StudentScore | Factor::StudentPassRate | Factor::StudentSubjectHistory => {
                FactorScope::Student
            }
            Factor::NewLecturer
            | Factor::LecturerScore
            | Factor::LecturerPassRate
            | Factor::StudentLecturerHistory => FactorScope::Lecturer,
            Factor::SubjectScore | Factor::SubjectPassRate => FactorScope::Subject,
            Factor::AssessmentCount
            | Factor::AssessmentDiversity
            | Factor::AssessmentEffectiveness
            | Factor::MissingFormative
            | Factor::MissingSummative
            | Factor::MethodCompatibility => FactorScope::Assessment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonRecord {
    pub factor: Factor,
    pub reason: String,
    pub detail: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub category: String,
    pub title: String,
    pub detail: String,
    pub suggestion: String,
    pub priority: Severity,
}
