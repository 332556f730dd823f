use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyzer::{self, AnalysisContext, GroupStats};
use crate::artifacts::TrainedArtifacts;
use crate::catalog::MethodCatalog;
use crate::config::{EXEMPLARS_PER_DOMAIN, HIGH_RISK_FAIL_PROB, MEDIUM_RISK_FAIL_PROB, SCORE_SCALE};
use crate::encoding::CategoricalField;
use crate::error::PredictError;
use crate::exemplar::ExemplarPrediction;
use crate::history::{pair_counts, StudentSummary};
use crate::models::{ReasonRecord, RecommendationRecord, RiskLevel, StudentOfferingRecord};
use crate::ppdg::AssessmentProfile;
use crate::recommend::{relevant_domains, synthesize, ExemplarSignals};

pub fn risk_level(prob_pass: f64) -> RiskLevel {
    let prob_fail = 1.0 - prob_pass;
    if prob_fail >= HIGH_RISK_FAIL_PROB {
        RiskLevel::High
    } else if prob_fail >= MEDIUM_RISK_FAIL_PROB {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub student_id: String,
    pub lecturer: String,
    pub subject: String,
    pub predicted_score: f64,
    pub prob_pass: f64,
    pub risk_level: RiskLevel,
    pub new_lecturer: bool,
    pub student_summary: StudentSummary,
    pub risk_factors: Vec<String>,
    pub lecturer_stats: Option<GroupStats>,
    pub subject_stats: Option<GroupStats>,
    pub profile: Option<AssessmentProfile>,
    pub reasons: Vec<ReasonRecord>,
    pub recommendations: Vec<RecommendationRecord>,
    pub exemplars: Vec<ExemplarPrediction>,
}

#[derive(Debug, Clone)]
pub enum PredictionResult {
    Scored(Box<Prediction>),
    Failed { message: String },
}

impl PredictionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, PredictionResult::Failed { .. })
    }

    #[cfg(test)]
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            PredictionResult::Scored(prediction) => Some(&**prediction),
            PredictionResult::Failed { .. } => None,
        }
    }

    /// JSON bundle with an `error` flag on both variants.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PredictionResult::Scored(prediction) => {
                let mut value = serde_json::to_value(&**prediction)
                    .unwrap_or_else(|err| serde_json::json!({ "message": err.to_string() }));
                if let Some(object) = value.as_object_mut() {
                    object.insert("error".into(), serde_json::Value::Bool(false));
                }
                value
            }
            PredictionResult::Failed { message } => serde_json::json!({ "error": true, "message": message }),
        }
    }
}

/// Scores (student, lecturer, subject) triples against one set of trained artifacts.
pub struct Predictor<'a> {
    artifacts: &'a TrainedArtifacts,
    catalog: MethodCatalog,
}

impl<'a> Predictor<'a> {
    pub fn new(artifacts: &'a TrainedArtifacts) -> Self {
        Self {
            artifacts,
            catalog: MethodCatalog,
        }
    }

    pub fn predict(&self, student: &str, lecturer: &str, subject: &str) -> PredictionResult {
        match self.try_predict(student.trim(), lecturer.trim(), subject.trim()) {
            Ok(prediction) => PredictionResult::Scored(Box::new(prediction)),
            Err(err) => {
                warn!(student, lecturer, subject, error = %err, "prediction failed");
                PredictionResult::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Known lecturer spelling matching `name` case-insensitively.
    fn canonical_lecturer(&self, name: &str) -> Option<&'a str> {
        let wanted = name.to_lowercase();
        self.artifacts
            .data
            .registry
            .get(CategoricalField::Lecturer)?
            .values()
            .iter()
            .find(|known| known.to_lowercase() == wanted)
            .map(String::as_str)
    }

    /// Only subjects with graded offerings have a subject code to score against.
    fn known_subject(&self, subject: &str) -> bool {
        self.artifacts
            .data
            .registry
            .get(CategoricalField::Subject)
            .is_some_and(|encoder| encoder.contains(subject))
    }

    /// Feature row in the ensemble's column order, plus the matrix row it was derived from.
    fn feature_row(&self, student: &str, lecturer: &str, subject: &str) -> Result<(Vec<f64>, usize), PredictError> {
        let data = &self.artifacts.data;
        let candidates: Vec<(usize, &StudentOfferingRecord)> = data
            .student_rows(student)
            .into_iter()
            .map(|i| (i, &data.records[i]))
            .collect();
        let exact = candidates
            .iter()
            .filter(|(_, r)| r.lecturer_name == lecturer && r.subject_id == subject)
            .max_by_key(|(_, r)| r.term)
            .map(|(i, _)| *i);
        let base = match exact {
            Some(i) => i,
            None => {
                let latest = candidates
                    .iter()
                    .max_by_key(|(_, r)| r.term)
                    .map(|(i, _)| *i)
                    .ok_or_else(|| PredictError::NoStudentRows(student.to_string()))?;
                debug!(student, lecturer, subject, base = latest, "synthesizing row from latest offering");
                latest
            }
        };

        let mut values = data.matrix.row(base).to_vec();
        let mut set = |name: &str, value: f64| {
            if let Some(index) = data.matrix.index_of(name) {
                values[index] = value;
            }
        };
        set("lecturer_encoded", data.registry.encode_lecturer(lecturer) as f64);
        set(
            "subject_encoded",
            data.registry.encode_or_default(CategoricalField::Subject, subject) as f64,
        );
        for (name, value) in data.method_values(subject, &self.catalog) {
            set(&name, value);
        }
        let (with_lecturer, in_group) = pair_counts(&data.records, student, lecturer, subject);
        set("num_with_lecturer", with_lecturer as f64);
        set("num_in_group", in_group as f64);

        let features = self
            .artifacts
            .ensemble
            .feature_names
            .iter()
            .map(|name| {
                data.matrix
                    .index_of(name)
                    .map(|index| values[index])
                    .ok_or_else(|| PredictError::MissingFeature(name.clone()))
            })
            .collect::<Result<Vec<f64>, PredictError>>()?;
        Ok((features, base))
    }

    fn try_predict(&self, student: &str, lecturer: &str, subject: &str) -> Result<Prediction, PredictError> {
        let data = &self.artifacts.data;
        let student_records: Vec<&StudentOfferingRecord> =
            data.records.iter().filter(|r| r.student_id == student).collect();
        if student_records.is_empty() {
            return Err(PredictError::UnknownStudent(student.to_string()));
        }
        if !self.known_subject(subject) {
            return Err(PredictError::UnknownSubject(subject.to_string()));
        }
        let known_lecturer = self.canonical_lecturer(lecturer);
        let lecturer_name = known_lecturer.unwrap_or(lecturer);

        let (features, base) = self.feature_row(student, lecturer_name, subject)?;
        let prob_pass = self.artifacts.ensemble.prob_pass(&features)?;
        let predicted_score = prob_pass * SCORE_SCALE;

        let summary = StudentSummary::from_records(&student_records);
        let context = AnalysisContext::gather(&data.records, student, lecturer_name, subject);
        let profile = data.assessment_in_use(subject).map(|used| {
            let teaching = data.teaching_in_use(subject, &self.catalog);
            AssessmentProfile::analyze(subject, used, &teaching, predicted_score, &self.catalog)
        });
        let analysis = analyzer::analyze(
            &context,
            lecturer_name,
            subject,
            predicted_score,
            profile.as_ref(),
            &self.catalog,
        );

        let signals = ExemplarSignals {
            predicted_score,
            diversity: profile.as_ref().map(|p| p.diversity),
            compatibility: profile.as_ref().map(|p| p.compatibility.score),
            latest_conduct: data.matrix.value(base, "latest_conduct_score"),
            recent_avg_score: Some(summary.recent_avg_score),
        };
        let exemplars: Vec<ExemplarPrediction> = relevant_domains(&analysis.reasons)
            .into_iter()
            .filter_map(|key| {
                let features = signals.features(key)?;
                self.artifacts.exemplars.predict(key, &features, EXEMPLARS_PER_DOMAIN)
            })
            .collect();
        let recommendations = synthesize(analysis.recommendations, &exemplars);

        Ok(Prediction {
            student_id: student.to_string(),
            lecturer: lecturer_name.to_string(),
            subject: subject.to_string(),
            predicted_score,
            prob_pass,
            risk_level: risk_level(prob_pass),
            new_lecturer: known_lecturer.is_none(),
            risk_factors: summary.risk_factors().into_iter().map(String::from).collect(),
            student_summary: summary,
            lecturer_stats: context.lecturer,
            subject_stats: context.subject,
            profile,
            reasons: analysis.reasons,
            recommendations,
            exemplars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::models::{Factor, Severity};

    #[test]
    fn risk_levels_follow_fail_probability() {
        assert_eq!(risk_level(0.2), RiskLevel::High);
        assert_eq!(risk_level(0.3), RiskLevel::High);
        assert_eq!(risk_level(0.5), RiskLevel::Medium);
        assert_eq!(risk_level(0.9), RiskLevel::Low);
    }

    #[test]
    fn known_triple_scores_within_range() {
        let predictor = Predictor::new(fixtures::trained());
        let result = predictor.predict("SV01", "Nguyen Van A", "INF0263");
        let prediction = result.prediction().expect("known triple scores");
        assert!((0.0..=1.0).contains(&prediction.prob_pass));
        assert_eq!(prediction.predicted_score, prediction.prob_pass * 6.0);
        assert!(!prediction.new_lecturer);
        assert!(prediction.recommendations.len() <= crate::config::MAX_RECOMMENDATIONS);
        assert!(prediction.profile.is_some());
    }

    #[test]
    fn lecturer_is_matched_case_insensitively() {
        let predictor = Predictor::new(fixtures::trained());
        let lower = predictor.predict("SV01", "nguyen van a", "INF0263");
        let exact = predictor.predict("SV01", "Nguyen Van A", "INF0263");
        let (lower, exact) = (lower.prediction().unwrap(), exact.prediction().unwrap());
        assert_eq!(lower.lecturer, "Nguyen Van A");
        assert_eq!(lower.prob_pass, exact.prob_pass);
    }

    #[test]
    fn unknown_lecturer_is_new() {
        let predictor = Predictor::new(fixtures::trained());
        let result = predictor.predict("SV02", "Someone Else", "MAT0001");
        let prediction = result.prediction().unwrap();
        assert!(prediction.new_lecturer);
        assert!(prediction.lecturer_stats.is_none());
        let new_lecturer = prediction
            .reasons
            .iter()
            .find(|r| r.factor == Factor::NewLecturer)
            .unwrap();
        assert_eq!(new_lecturer.severity, Severity::Medium);
        assert_eq!(new_lecturer.detail, "No prior teaching records found for this lecturer");
    }

    #[test]
    fn reason_factors_use_readable_tags_in_json() {
        let json = Predictor::new(fixtures::trained())
            .predict("SV04", "Nobody New", "PLO0043")
            .to_json();
        assert_eq!(json["error"], false);
        let factors: Vec<&str> = json["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|reason| reason["factor"].as_str().unwrap())
            .collect();
        assert!(factors.contains(&"new lecturer"));
        assert!(factors.iter().all(|f| !f.contains('_')));
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let predictor = Predictor::new(fixtures::trained());
        for (student, lecturer, subject) in [
            ("SV04", "Le Van C", "INF0263"),
            ("SV04", "Nobody New", "PLO0043"),
        ] {
            let first = predictor.predict(student, lecturer, subject).to_json();
            let second = predictor.predict(student, lecturer, subject).to_json();
            assert_eq!(first["error"], false);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn subject_without_grades_is_rejected() {
        let mut artifacts = fixtures::trained().clone();
        let codes = vec!["EM1".to_string(), "EM6".to_string()];
        if let Some(table) = artifacts.data.assessment.as_mut() {
            table.insert("BIO0001", codes.clone());
        }
        if let Some(table) = artifacts.data.teaching.as_mut() {
            table.insert("BIO0001", vec!["TM1".to_string()]);
        }
        let result = Predictor::new(&artifacts).predict("SV04", "Le Van C", "BIO0001");
        assert!(result.is_error());
        assert_eq!(result.to_json()["message"], "Invalid subject ID: BIO0001");
    }

    #[test]
    fn inexperienced_lecturer_and_weak_history() {
        let predictor = Predictor::new(fixtures::trained());
        let result = predictor.predict("SV99", "Tran Thi B", "PLO0043");
        let prediction = result.prediction().unwrap();
        let factors: Vec<Factor> = prediction.reasons.iter().map(|r| r.factor).collect();
        assert!(factors.contains(&Factor::StudentScore));
        assert!(factors.contains(&Factor::StudentPassRate));
        assert!(factors.contains(&Factor::NewLecturer));
        assert!(factors.contains(&Factor::LecturerScore));
        let lecturer = prediction.lecturer_stats.as_ref().unwrap();
        assert_eq!(lecturer.records, 5);
    }

    #[test]
    fn invalid_ids_fail_without_panicking() {
        let predictor = Predictor::new(fixtures::trained());
        let student = predictor.predict("NOPE", "Nguyen Van A", "INF0263");
        assert!(student.is_error());
        assert_eq!(student.to_json()["message"], "Invalid student ID: NOPE");
        let subject = predictor.predict("SV01", "Nguyen Van A", "XYZ9999");
        assert!(subject.is_error());
        assert_eq!(subject.to_json()["error"], true);
    }

    #[test]
    fn json_bundle_carries_error_flag() {
        let predictor = Predictor::new(fixtures::trained());
        let json = predictor.predict("SV03", "Le Van C", "MAT0001").to_json();
        assert_eq!(json["error"], false);
        assert!(json["predicted_score"].as_f64().is_some());
        assert!(json["risk_level"].is_string());
    }
}
