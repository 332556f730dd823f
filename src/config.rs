use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ml::boosting::BoostingParams;
use crate::ml::forest::{ClassWeight, ForestParams};
use crate::ml::linear::LogisticParams;
use crate::ml::tree::MaxFeatures;

pub const SCORE_SCALE: f64 = 6.0;
pub const PASS_SUMMARY_THRESHOLD: f64 = 4.0;
pub const CLO_ACHIEVED_THRESHOLD: f64 = 3.5;
pub const ABSENT_MARKER: &str = "VT";

pub const LOW_SCORE_THRESHOLD: f64 = 3.5;
pub const LOW_PASS_RATE: f64 = 0.7;
/// Lecturers with fewer historical student records than this are treated as new.
pub const NEW_LECTURER_MIN_STUDENTS: usize = 10;
pub const MIN_ASSESSMENT_METHODS: usize = 5;
pub const LOW_DIVERSITY: f64 = 6.0;
pub const LOW_COMPATIBILITY: f64 = 6.0;
pub const SEVERE_COMPATIBILITY: f64 = 4.0;
pub const LOW_EFFECTIVENESS_SCORE: f64 = 4.0;
pub const POSITIVE_SCORE: f64 = 4.5;
pub const COMPREHENSIVE_REASON_COUNT: usize = 3;

pub const HIGH_RISK_FAIL_PROB: f64 = 0.7;
pub const MEDIUM_RISK_FAIL_PROB: f64 = 0.4;

pub const RANDOM_SEED: u64 = 42;
pub const TEST_FRACTION: f64 = 0.2;
pub const CV_FOLDS: usize = 5;
pub const SEARCH_FOLDS: usize = 3;
pub const SEARCH_ITERATIONS: usize = 20;
pub const TOP_IMPORTANCES: usize = 10;

pub const EXEMPLARS_PER_DOMAIN: usize = 1;
pub const EXEMPLAR_PAD_VALUE: f64 = 100.0;
pub const MAX_RECOMMENDATIONS: usize = 12;
pub const ATTENTION_SCORE: f64 = 3.0;

pub const DEFAULT_CONDUCT_SCORE: f64 = 65.0;
pub const DEFAULT_CONDUCT_CLASSIFICATION: &str = "Fair";
pub const DEFAULT_CONDUCT_SEMESTER: i32 = 1;
pub const DEFAULT_CONDUCT_YEAR: i32 = 2324;
pub const UNKNOWN_CATEGORY: &str = "Unknown";

pub const SUBJECT_ALIASES: &[(&str, &str)] = &[
    ("POL0072", "PLO0072"),
    ("POL0043", "PLO0043"),
    ("POL0032", "PLO0032"),
    ("POL0052", "PLO0052"),
];

/// Retired code kept alive only when its successor is valid.
pub const MERGED_SUBJECT: (&str, &str) = ("INF0153", "INF0263");

/// Model inputs in fitting order. Columns absent from the integrated matrix are skipped.
pub const MODEL_FEATURES: &[&str] = &[
    "student_id_encoded",
    "lecturer_encoded",
    "subject_encoded",
    "gender_encoded",
    "religion_encoded",
    "birth_place_encoded",
    "ethnicity_encoded",
    "avg_conduct_score",
    "latest_conduct_score",
    "latest_conduct_semester",
    "latest_conduct_year",
    "conduct_trend",
    "conduct_classification_encoded",
    "num_conduct_semesters",
    "study_hours_this_semester",
    "study_minutes_this_semester",
    "total_subjects",
    "passed_subjects",
    "pass_rate",
    "clo_achieved_count",
    "clo_achieved_rate",
    "avg_exam_score",
    "std_exam_score",
    "min_exam_score",
    "max_exam_score",
    "avg_summary_score",
    "std_summary_score",
    "absent_exam_count",
    "absent_summary_count",
    "recent_avg_score",
    "improvement_trend",
    "recent_pass_count",
    "recent_fail_count",
    "num_with_lecturer",
    "num_in_group",
    "total_ppdg_count",
    "formative_ppdg_count",
    "summative_ppdg_count",
];

/// Prefix for method indicator columns, which are appended after `MODEL_FEATURES`.
pub const TEACHING_COLUMN_PREFIX: &str = "TM";
pub const ASSESSMENT_COLUMN_PREFIX: &str = "EM";

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn grades(&self) -> PathBuf {
        self.root.join("grades.csv")
    }

    pub fn teaching_methods(&self) -> PathBuf {
        self.root.join("teaching_methods.csv")
    }

    pub fn assessment_methods(&self) -> PathBuf {
        self.root.join("assessment_methods.csv")
    }

    pub fn demographics(&self) -> PathBuf {
        self.root.join("demographics.csv")
    }

    pub fn conduct(&self) -> PathBuf {
        self.root.join("conduct.csv")
    }

    pub fn self_study(&self) -> PathBuf {
        self.root.join("self_study.csv")
    }

    pub fn exemplar_corpus(&self, file_stem: &str) -> PathBuf {
        self.root.join("exemplars").join(format!("{file_stem}.csv"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub seed: u64,
    pub test_fraction: f64,
    pub cv_folds: usize,
    pub search_folds: usize,
    pub search_iterations: usize,
    pub linear: LogisticParams,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            seed: RANDOM_SEED,
            test_fraction: TEST_FRACTION,
            cv_folds: CV_FOLDS,
            search_folds: SEARCH_FOLDS,
            search_iterations: SEARCH_ITERATIONS,
            linear: LogisticParams {
                c: 0.1,
                max_iter: 1000,
                tolerance: 1e-4,
            },
            forest: ForestParams {
                n_estimators: 300,
                max_depth: Some(20),
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: MaxFeatures::Sqrt,
                class_weight: ClassWeight::BalancedSubsample,
                seed: RANDOM_SEED,
            },
            boosting: BoostingParams {
                n_estimators: 100,
                learning_rate: 0.05,
                max_depth: Some(10),
                min_samples_split: 2,
                min_samples_leaf: 2,
                subsample: 0.8,
                seed: RANDOM_SEED,
            },
        }
    }
}

/// Severity classifiers for the exemplar corpora.
pub fn exemplar_forest_params() -> ForestParams {
    ForestParams {
        n_estimators: 200,
        max_depth: Some(15),
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features: MaxFeatures::Sqrt,
        class_weight: ClassWeight::Balanced,
        seed: RANDOM_SEED,
    }
}

pub fn exemplar_boosting_params() -> BoostingParams {
    BoostingParams {
        n_estimators: 100,
        learning_rate: 0.1,
        max_depth: Some(10),
        min_samples_split: 2,
        min_samples_leaf: 1,
        subsample: 1.0,
        seed: RANDOM_SEED,
    }
}
