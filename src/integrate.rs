use std::collections::{BTreeSet, HashMap};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::MethodCatalog;
use crate::config::{
    CLO_ACHIEVED_THRESHOLD, DEFAULT_CONDUCT_CLASSIFICATION, DEFAULT_CONDUCT_SCORE, DEFAULT_CONDUCT_SEMESTER,
    DEFAULT_CONDUCT_YEAR, PASS_SUMMARY_THRESHOLD, UNKNOWN_CATEGORY,
};
use crate::encoding::{CategoricalField, EncoderRegistry};
use crate::error::JoinError;
use crate::features::{coerce_score, FeatureGroup, FeatureManifest, FeatureMatrix, GroupColumns, JoinOutcome};
use crate::history;
use crate::loader::{MethodTable, RawTables};
use crate::models::{ConductRow, DemographicRow, GradeRow, SelfStudyRow, StudentOfferingRecord, Term};

/// Everything the trainer and the predictor need from the source tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedData {
    pub records: Vec<StudentOfferingRecord>,
    pub matrix: FeatureMatrix,
    pub manifest: FeatureManifest,
    pub registry: EncoderRegistry,
    pub teaching: Option<MethodTable>,
    pub assessment: Option<MethodTable>,
}

impl IntegratedData {
    pub fn student_rows(&self, student: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.student_id == student)
            .map(|(i, _)| i)
            .collect()
    }

    /// Teaching methods used by `subject`, falling back to the catalog default set.
    pub fn teaching_in_use(&self, subject: &str, catalog: &MethodCatalog) -> BTreeSet<String> {
        self.teaching
            .as_ref()
            .and_then(|t| t.used(subject))
            .filter(|used| !used.is_empty())
            .cloned()
            .unwrap_or_else(|| catalog.default_teaching())
    }

    /// Assessment methods recorded for `subject`, or `None` when the subject has no record.
    pub fn assessment_in_use(&self, subject: &str) -> Option<&BTreeSet<String>> {
        self.assessment.as_ref().and_then(|t| t.used(subject))
    }

    /// Method-group column values for `subject`, in matrix column order.
    pub fn method_values(&self, subject: &str, catalog: &MethodCatalog) -> Vec<(String, f64)> {
        let mut values = Vec::new();
        if self.manifest.includes(FeatureGroup::TeachingMethods) {
            values.extend(teaching_names(catalog).into_iter().zip(teaching_values(
                self.teaching.as_ref(),
                subject,
                catalog,
            )));
        }
        if self.manifest.includes(FeatureGroup::AssessmentMethods) {
            values.extend(assessment_names(catalog).into_iter().zip(assessment_values(
                self.assessment.as_ref(),
                subject,
                catalog,
            )));
        }
        values
    }
}

pub fn build_record(row: &GradeRow) -> StudentOfferingRecord {
    let exam_score_10 = coerce_score(&row.exam_score);
    let summary_score = coerce_score(&row.summary_score);
    let absent_exam = is_absent(&row.exam_score, exam_score_10);
    let absent_summary = is_absent(&row.summary_score, summary_score);
    let exam_score_6 = exam_score_10 * 0.6;
    StudentOfferingRecord {
        student_id: row.student_id.clone(),
        lecturer_name: row.lecturer_name.clone(),
        subject_id: row.subject_id.clone(),
        term: Term::new(row.year, row.semester),
        raw_exam_score: row.exam_score.clone(),
        raw_summary_score: row.summary_score.clone(),
        exam_score_10,
        exam_score_6,
        summary_score,
        absent_exam,
        absent_summary,
        passed: summary_score >= PASS_SUMMARY_THRESHOLD && !absent_summary,
        clo_achieved: exam_score_6 >= CLO_ACHIEVED_THRESHOLD && !absent_exam,
    }
}

fn is_absent(raw: &str, coerced: f64) -> bool {
    raw.trim().eq_ignore_ascii_case(crate::config::ABSENT_MARKER) || coerced == 0.0
}

pub fn integrate(tables: &RawTables, catalog: &MethodCatalog) -> anyhow::Result<IntegratedData> {
    if tables.grades.is_empty() {
        bail!("no grade records left after schema normalization");
    }
    let records: Vec<StudentOfferingRecord> = tables.grades.iter().map(build_record).collect();
    let mut registry = EncoderRegistry::new();
    let mut matrix = FeatureMatrix::with_rows(records.len());
    let mut manifest = FeatureManifest::default();

    let outcomes = vec![
        JoinOutcome::from_result(FeatureGroup::Identity, identity_columns(&records, &mut registry)),
        JoinOutcome::from_result(
            FeatureGroup::Demographic,
            demographic_columns(&records, tables.demographics.as_deref(), &mut registry),
        ),
        JoinOutcome::from_result(
            FeatureGroup::Conduct,
            conduct_columns(&records, tables.conduct.as_deref(), &mut registry),
        ),
        JoinOutcome::from_result(
            FeatureGroup::SelfStudy,
            self_study_columns(&records, tables.self_study.as_deref()),
        ),
        JoinOutcome::from_result(
            FeatureGroup::TeachingMethods,
            teaching_columns(&records, tables.teaching.as_ref(), catalog),
        ),
        JoinOutcome::from_result(
            FeatureGroup::AssessmentMethods,
            assessment_columns(&records, tables.assessment.as_ref(), catalog),
        ),
        JoinOutcome::Included(history::history_columns(&records)),
    ];

    for outcome in outcomes {
        match outcome {
            JoinOutcome::Included(columns) => {
                let group = columns.group;
                match matrix.append(columns) {
                    Ok(()) => manifest.included.push(group),
                    Err(err) => manifest.omitted.push((group, err.to_string())),
                }
            }
            JoinOutcome::Omitted { group, reason } => manifest.omitted.push((group, reason)),
        }
    }

    info!(
        records = records.len(),
        features = matrix.names().len(),
        included = ?manifest.included,
        omitted = manifest.omitted.len(),
        "feature integration finished"
    );

    Ok(IntegratedData {
        records,
        matrix,
        manifest,
        registry,
        teaching: tables.teaching.clone(),
        assessment: tables.assessment.clone(),
    })
}

fn identity_columns(
    records: &[StudentOfferingRecord],
    registry: &mut EncoderRegistry,
) -> Result<GroupColumns, JoinError> {
    registry.fit(CategoricalField::Student, records.iter().map(|r| &r.student_id));
    registry.fit(CategoricalField::Lecturer, records.iter().map(|r| &r.lecturer_name));
    registry.fit(CategoricalField::Subject, records.iter().map(|r| &r.subject_id));

    let mut columns = GroupColumns::new(
        FeatureGroup::Identity,
        vec![
            "student_id_encoded".into(),
            "lecturer_encoded".into(),
            "subject_encoded".into(),
        ],
    );
    for record in records {
        columns.push(vec![
            registry.encode(CategoricalField::Student, &record.student_id)? as f64,
            registry.encode(CategoricalField::Lecturer, &record.lecturer_name)? as f64,
            registry.encode(CategoricalField::Subject, &record.subject_id)? as f64,
        ]);
    }
    Ok(columns)
}

#[derive(Debug, Clone, PartialEq)]
struct Demographics {
    gender: String,
    religion: String,
    birth_place: String,
    ethnicity: String,
}

impl Demographics {
    fn unknown() -> Self {
        Self {
            gender: UNKNOWN_CATEGORY.to_string(),
            religion: UNKNOWN_CATEGORY.to_string(),
            birth_place: UNKNOWN_CATEGORY.to_string(),
            ethnicity: UNKNOWN_CATEGORY.to_string(),
        }
    }

    fn normalized(row: &DemographicRow) -> Self {
        let gender = match row.gender.trim() {
            "" => UNKNOWN_CATEGORY,
            "Nam" | "Male" | "1" => "Nam",
            "Nữ" | "Female" | "0" => "Nữ",
            _ => "Khác",
        };
        let religion = match row.religion.trim() {
            "" | "Không" | "None" | "none" => "Không tôn giáo",
            other => other,
        };
        let birth_place = match row.birth_place.trim() {
            "" => UNKNOWN_CATEGORY,
            other => other,
        };
        let ethnicity = match row.ethnicity.trim() {
            "" => UNKNOWN_CATEGORY,
            "Kinh" | "Việt" => "Kinh",
            other => other,
        };
        Self {
            gender: gender.to_string(),
            religion: religion.to_string(),
            birth_place: birth_place.to_string(),
            ethnicity: ethnicity.to_string(),
        }
    }
}

fn demographic_columns(
    records: &[StudentOfferingRecord],
    rows: Option<&[DemographicRow]>,
    registry: &mut EncoderRegistry,
) -> Result<GroupColumns, JoinError> {
    let rows = rows.ok_or(JoinError::MissingTable("demographics"))?;
    let by_student: HashMap<&str, Demographics> = rows
        .iter()
        .map(|row| (row.student_id.as_str(), Demographics::normalized(row)))
        .collect();
    let unknown = Demographics::unknown();
    let per_record: Vec<&Demographics> = records
        .iter()
        .map(|r| by_student.get(r.student_id.as_str()).unwrap_or(&unknown))
        .collect();
    let matched = records
        .iter()
        .filter(|r| by_student.contains_key(r.student_id.as_str()))
        .count();
    info!(matched, "demographic records joined");

    registry.fit(CategoricalField::Gender, per_record.iter().map(|d| &d.gender));
    registry.fit(CategoricalField::Religion, per_record.iter().map(|d| &d.religion));
    registry.fit(CategoricalField::BirthPlace, per_record.iter().map(|d| &d.birth_place));
    registry.fit(CategoricalField::Ethnicity, per_record.iter().map(|d| &d.ethnicity));

    let mut columns = GroupColumns::new(
        FeatureGroup::Demographic,
        vec![
            "gender_encoded".into(),
            "religion_encoded".into(),
            "birth_place_encoded".into(),
            "ethnicity_encoded".into(),
        ],
    );
    for d in per_record {
        columns.push(vec![
            registry.encode(CategoricalField::Gender, &d.gender)? as f64,
            registry.encode(CategoricalField::Religion, &d.religion)? as f64,
            registry.encode(CategoricalField::BirthPlace, &d.birth_place)? as f64,
            registry.encode(CategoricalField::Ethnicity, &d.ethnicity)? as f64,
        ]);
    }
    Ok(columns)
}

/// Conduct state of one offering, taken from the latest record at or before its term.
#[derive(Debug, Clone, PartialEq)]
pub struct ConductSnapshot {
    pub average: f64,
    pub latest_score: f64,
    pub latest_term: Term,
    pub trend: f64,
    pub classification: String,
    pub semesters: usize,
}

fn term_of(row: &ConductRow) -> Term {
    Term::new(row.school_year, row.semester)
}

/// `history` must be sorted by term.
pub fn conduct_snapshot(history: &[&ConductRow], term: Term) -> ConductSnapshot {
    let average = if history.is_empty() {
        DEFAULT_CONDUCT_SCORE
    } else {
        history.iter().map(|r| r.conduct_score).sum::<f64>() / history.len() as f64
    };
    let upto = history.partition_point(|r| term_of(r) <= term);
    let Some(latest) = upto.checked_sub(1).map(|i| history[i]) else {
        return ConductSnapshot {
            average,
            latest_score: DEFAULT_CONDUCT_SCORE,
            latest_term: Term::new(DEFAULT_CONDUCT_YEAR, DEFAULT_CONDUCT_SEMESTER),
            trend: 0.0,
            classification: DEFAULT_CONDUCT_CLASSIFICATION.to_string(),
            semesters: history.len(),
        };
    };
    let latest_term = term_of(latest);
    let before = history.partition_point(|r| term_of(r) < latest_term);
    let trend = before
        .checked_sub(1)
        .map_or(0.0, |i| latest.conduct_score - history[i].conduct_score);
    let classification = match latest.classification.trim() {
        "" => DEFAULT_CONDUCT_CLASSIFICATION.to_string(),
        other => other.to_string(),
    };
    ConductSnapshot {
        average,
        latest_score: latest.conduct_score,
        latest_term,
        trend,
        classification,
        semesters: history.len(),
    }
}

fn conduct_columns(
    records: &[StudentOfferingRecord],
    rows: Option<&[ConductRow]>,
    registry: &mut EncoderRegistry,
) -> Result<GroupColumns, JoinError> {
    let rows = rows.ok_or(JoinError::MissingTable("conduct"))?;
    let mut by_student: HashMap<&str, Vec<&ConductRow>> = HashMap::new();
    for row in rows {
        by_student.entry(row.student_id.as_str()).or_default().push(row);
    }
    for history in by_student.values_mut() {
        history.sort_by_key(|r| term_of(r));
    }

    let snapshots: Vec<ConductSnapshot> = records
        .iter()
        .map(|r| {
            let history = by_student.get(r.student_id.as_str()).map_or(&[][..], Vec::as_slice);
            conduct_snapshot(history, r.term)
        })
        .collect();
    registry.fit(
        CategoricalField::ConductClassification,
        snapshots.iter().map(|s| &s.classification),
    );

    let mut columns = GroupColumns::new(
        FeatureGroup::Conduct,
        vec![
            "avg_conduct_score".into(),
            "latest_conduct_score".into(),
            "latest_conduct_semester".into(),
            "latest_conduct_year".into(),
            "conduct_trend".into(),
            "conduct_classification_encoded".into(),
            "num_conduct_semesters".into(),
        ],
    );
    for s in &snapshots {
        columns.push(vec![
            s.average,
            s.latest_score,
            f64::from(s.latest_term.semester),
            f64::from(s.latest_term.year),
            s.trend,
            registry.encode(CategoricalField::ConductClassification, &s.classification)? as f64,
            s.semesters as f64,
        ]);
    }
    Ok(columns)
}

fn self_study_columns(
    records: &[StudentOfferingRecord],
    rows: Option<&[SelfStudyRow]>,
) -> Result<GroupColumns, JoinError> {
    let rows = rows.ok_or(JoinError::MissingTable("self-study"))?;
    let mut totals: HashMap<(&str, Term), (f64, f64)> = HashMap::new();
    for row in rows {
        let entry = totals
            .entry((row.student_id.as_str(), Term::new(row.year, row.semester)))
            .or_insert((0.0, 0.0));
        entry.0 += row.study_hours;
        entry.1 += row.study_minutes;
    }
    let mut columns = GroupColumns::new(
        FeatureGroup::SelfStudy,
        vec![
            "study_hours_this_semester".into(),
            "study_minutes_this_semester".into(),
        ],
    );
    for record in records {
        let (hours, minutes) = totals
            .get(&(record.student_id.as_str(), record.term))
            .copied()
            .unwrap_or((0.0, 0.0));
        columns.push(vec![hours, minutes]);
    }
    Ok(columns)
}

pub fn teaching_names(catalog: &MethodCatalog) -> Vec<String> {
    catalog.teaching_codes().map(str::to_string).collect()
}

pub fn assessment_names(catalog: &MethodCatalog) -> Vec<String> {
    catalog
        .assessment_codes()
        .map(str::to_string)
        .chain([
            "total_ppdg_count".to_string(),
            "formative_ppdg_count".to_string(),
            "summative_ppdg_count".to_string(),
        ])
        .collect()
}

fn indicators<'a>(codes: impl Iterator<Item = &'a str>, used: Option<&BTreeSet<String>>) -> Vec<f64> {
    codes
        .map(|code| match used {
            Some(used) if used.contains(code) => 1.0,
            _ => 0.0,
        })
        .collect()
}

pub fn teaching_values(table: Option<&MethodTable>, subject: &str, catalog: &MethodCatalog) -> Vec<f64> {
    indicators(catalog.teaching_codes(), table.and_then(|t| t.used(subject)))
}

pub fn assessment_values(table: Option<&MethodTable>, subject: &str, catalog: &MethodCatalog) -> Vec<f64> {
    let used = table.and_then(|t| t.used(subject));
    let mut values = indicators(catalog.assessment_codes(), used);
    let (total, formative) = catalog
        .assessment_codes()
        .filter(|code| used.is_some_and(|u| u.contains(*code)))
        .fold((0usize, 0usize), |(total, formative), code| {
            (total + 1, formative + usize::from(catalog.is_formative(code)))
        });
    values.extend([total as f64, formative as f64, (total - formative) as f64]);
    values
}

fn teaching_columns(
    records: &[StudentOfferingRecord],
    table: Option<&MethodTable>,
    catalog: &MethodCatalog,
) -> Result<GroupColumns, JoinError> {
    let table = table.ok_or(JoinError::MissingTable("teaching methods"))?;
    let mut columns = GroupColumns::new(FeatureGroup::TeachingMethods, teaching_names(catalog));
    let mut cache: HashMap<&str, Vec<f64>> = HashMap::new();
    for record in records {
        let values = cache
            .entry(record.subject_id.as_str())
            .or_insert_with(|| teaching_values(Some(table), &record.subject_id, catalog));
        columns.push(values.clone());
    }
    Ok(columns)
}

fn assessment_columns(
    records: &[StudentOfferingRecord],
    table: Option<&MethodTable>,
    catalog: &MethodCatalog,
) -> Result<GroupColumns, JoinError> {
    let table = table.ok_or(JoinError::MissingTable("assessment methods"))?;
    let mut columns = GroupColumns::new(FeatureGroup::AssessmentMethods, assessment_names(catalog));
    let mut cache: HashMap<&str, Vec<f64>> = HashMap::new();
    for record in records {
        let values = cache
            .entry(record.subject_id.as_str())
            .or_insert_with(|| assessment_values(Some(table), &record.subject_id, catalog));
        columns.push(values.clone());
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn conduct(year: i32, semester: i32, score: f64) -> ConductRow {
        ConductRow {
            student_id: "SV01".into(),
            school_year: year,
            semester,
            conduct_score: score,
            classification: String::new(),
        }
    }

    fn grade(student: &str, subject: &str, exam: &str, summary: &str, year: i32) -> GradeRow {
        GradeRow {
            student_id: student.into(),
            lecturer_name: "Nguyen Van A".into(),
            subject_id: subject.into(),
            exam_score: exam.into(),
            summary_score: summary.into(),
            year,
            semester: 1,
        }
    }

    #[test]
    fn conduct_join_picks_latest_record_at_or_before_term() {
        let rows = [conduct(2021, 1, 80.0), conduct(2022, 1, 60.0)];
        let history: Vec<&ConductRow> = rows.iter().collect();
        let snapshot = conduct_snapshot(&history, Term::new(2022, 1));
        assert_eq!(snapshot.latest_score, 60.0);
        assert_eq!(snapshot.trend, -20.0);
        assert_eq!(snapshot.semesters, 2);
        assert_relative_eq!(snapshot.average, 70.0);
    }

    #[test]
    fn conduct_join_falls_back_to_defaults() {
        let rows = [conduct(2023, 1, 90.0)];
        let history: Vec<&ConductRow> = rows.iter().collect();
        let snapshot = conduct_snapshot(&history, Term::new(2021, 2));
        assert_eq!(snapshot.latest_score, DEFAULT_CONDUCT_SCORE);
        assert_eq!(snapshot.latest_term, Term::new(DEFAULT_CONDUCT_YEAR, DEFAULT_CONDUCT_SEMESTER));
        assert_eq!(snapshot.classification, DEFAULT_CONDUCT_CLASSIFICATION);
        assert_eq!(snapshot.trend, 0.0);
    }

    #[test]
    fn absent_marker_fails_the_offering() {
        let record = build_record(&grade("SV01", "INF0263", "VT", "VT", 2022));
        assert!(record.absent_exam && record.absent_summary);
        assert!(!record.passed && !record.clo_achieved);

        let record = build_record(&grade("SV01", "INF0263", "7,5", "6", 2022));
        assert_relative_eq!(record.exam_score_6, 4.5);
        assert!(record.passed && record.clo_achieved);
    }

    #[test]
    fn missing_tables_are_listed_in_the_manifest() {
        let tables = RawTables {
            grades: vec![grade("SV01", "INF0263", "7", "7", 2022), grade("SV02", "INF0263", "3", "3", 2022)],
            ..RawTables::default()
        };
        let data = integrate(&tables, &MethodCatalog).unwrap();
        assert!(data.manifest.includes(FeatureGroup::Identity));
        assert!(data.manifest.includes(FeatureGroup::History));
        assert!(!data.manifest.includes(FeatureGroup::Conduct));
        assert_eq!(data.manifest.omitted.len(), 5);
        assert_eq!(data.matrix.n_rows(), 2);
        assert_eq!(data.matrix.value(1, "student_id_encoded"), Some(1.0));
    }

    #[test]
    fn unknown_demographics_get_a_sentinel_code() {
        let tables = RawTables {
            grades: vec![grade("SV01", "INF0263", "7", "7", 2022), grade("SV02", "INF0263", "3", "3", 2022)],
            demographics: Some(vec![DemographicRow {
                student_id: "SV01".into(),
                gender: "Male".into(),
                religion: "None".into(),
                birth_place: "Can Tho".into(),
                ethnicity: "Việt".into(),
            }]),
            ..RawTables::default()
        };
        let data = integrate(&tables, &MethodCatalog).unwrap();
        let ethnicity = data.registry.get(CategoricalField::Ethnicity).unwrap();
        assert_eq!(ethnicity.values(), &["Kinh".to_string(), UNKNOWN_CATEGORY.to_string()]);
        assert_eq!(data.matrix.value(1, "ethnicity_encoded"), Some(1.0));
        assert!(data.registry.get(CategoricalField::Religion).unwrap().contains("Không tôn giáo"));
    }

    #[test]
    fn assessment_counts_split_formative_and_summative() {
        let mut table = MethodTable::default();
        table.insert("INF0263", ["EM1", "EM4", "EM6", "EM11"].map(String::from));
        let values = assessment_values(Some(&table), "INF0263", &MethodCatalog);
        let names = assessment_names(&MethodCatalog);
        let at = |name: &str| values[names.iter().position(|n| n == name).unwrap()];
        assert_eq!(at("EM1"), 1.0);
        assert_eq!(at("EM2"), 0.0);
        assert_eq!(at("total_ppdg_count"), 4.0);
        assert_eq!(at("formative_ppdg_count"), 2.0);
        assert_eq!(at("summative_ppdg_count"), 2.0);
        assert!(assessment_values(Some(&table), "MAT0001", &MethodCatalog).iter().all(|v| *v == 0.0));
    }
}
