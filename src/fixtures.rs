//! Small in-memory tables shared by the pipeline tests.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::artifacts::TrainedArtifacts;
use crate::catalog::MethodCatalog;
use crate::config::TrainerConfig;
use crate::exemplar::tests::graded_corpus;
use crate::exemplar::{DomainKey, ExemplarRow};
use crate::integrate::{integrate, IntegratedData};
use crate::loader::{MethodTable, RawTables};
use crate::models::{ConductRow, DemographicRow, GradeRow, SelfStudyRow};
use crate::schema;

const STUDENTS: usize = 24;
const NEW_LECTURER_STUDENTS: [&str; 5] = ["SV00", "SV03", "SV06", "SV09", "SV99"];

fn student(i: usize) -> String {
    format!("SV{i:02}")
}

fn is_weak(i: usize) -> bool {
    i % 3 == 0
}

fn grade(student: &str, lecturer: &str, subject: &str, (year, semester): (i32, i32), exam: &str, summary: &str) -> GradeRow {
    GradeRow {
        student_id: student.to_string(),
        lecturer_name: lecturer.to_string(),
        subject_id: subject.to_string(),
        exam_score: exam.to_string(),
        summary_score: summary.to_string(),
        year,
        semester,
    }
}

/// Every student takes three subjects; a third of them are weak and fail everything.
/// `SV99` passes one of two offerings and averages 3.0 on the six-point scale.
pub fn grades() -> Vec<GradeRow> {
    let mut rows = Vec::new();
    for i in 0..STUDENTS {
        let id = student(i);
        let (exam, summary) = if is_weak(i) {
            ("4", "3.5")
        } else {
            (["7", "8", "9"][i % 3], "7.5")
        };
        rows.push(grade(&id, "Nguyen Van A", "INF0263", (2022, 1), exam, summary));
        rows.push(grade(&id, "Le Van C", "MAT0001", (2022, 2), exam, summary));
        if NEW_LECTURER_STUDENTS.contains(&id.as_str()) {
            rows.push(grade(&id, "Tran Thi B", "PLO0043", (2023, 1), "5", "3.5"));
        } else {
            rows.push(grade(&id, "Le Van C", "PLO0043", (2023, 1), exam, summary));
        }
    }
    rows.push(grade("SV99", "Nguyen Van A", "INF0263", (2022, 1), "5", "5"));
    rows.push(grade("SV99", "Tran Thi B", "PLO0043", (2023, 1), "5", "3.5"));
    rows
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

pub fn teaching() -> MethodTable {
    let mut table = MethodTable::default();
    table.insert("INF0263", codes(&["TM1", "TM2", "TM9"]));
    table.insert("MAT0001", codes(&["TM1", "TM4"]));
    table.insert("PLO0043", codes(&["TM21"]));
    table
}

pub fn assessment() -> MethodTable {
    let mut table = MethodTable::default();
    table.insert("INF0263", codes(&["EM1", "EM2", "EM4", "EM6", "EM8"]));
    table.insert("MAT0001", codes(&["EM6", "EM7"]));
    table.insert("PLO0043", codes(&["EM2"]));
    table
}

fn all_students() -> impl Iterator<Item = (usize, String)> {
    (0..STUDENTS).map(|i| (i, student(i))).chain(std::iter::once((99, "SV99".to_string())))
}

pub fn demographics() -> Vec<DemographicRow> {
    all_students()
        .map(|(i, id)| DemographicRow {
            student_id: id,
            gender: if i % 2 == 0 { "Nam" } else { "Nữ" }.to_string(),
            religion: String::new(),
            birth_place: if i % 4 == 0 { "Huế" } else { "Hà Nội" }.to_string(),
            ethnicity: "Kinh".to_string(),
        })
        .collect()
}

pub fn conduct() -> Vec<ConductRow> {
    all_students()
        .flat_map(|(i, id)| {
            let latest = if is_weak(i) { 60.0 } else { 85.0 };
            [
                ConductRow {
                    student_id: id.clone(),
                    school_year: 2022,
                    semester: 1,
                    conduct_score: 75.0,
                    classification: "Good".to_string(),
                },
                ConductRow {
                    student_id: id,
                    school_year: 2022,
                    semester: 2,
                    conduct_score: latest,
                    classification: if is_weak(i) { "Fair" } else { "Excellent" }.to_string(),
                },
            ]
        })
        .collect()
}

pub fn self_study() -> Vec<SelfStudyRow> {
    all_students()
        .map(|(i, id)| SelfStudyRow {
            student_id: id,
            year: 2022,
            semester: 1,
            study_hours: if is_weak(i) { 2.0 } else { 10.0 },
            study_minutes: 30.0,
        })
        .collect()
}

pub fn tables() -> RawTables {
    RawTables {
        grades: grades(),
        teaching: Some(teaching()),
        assessment: Some(assessment()),
        demographics: Some(demographics()),
        conduct: Some(conduct()),
        self_study: Some(self_study()),
    }
}

pub fn corpora() -> BTreeMap<DomainKey, Vec<ExemplarRow>> {
    [DomainKey::CloAttendance, DomainKey::TeachingMethods, DomainKey::EvaluationMethods]
        .into_iter()
        .map(|key| (key, graded_corpus(key, 8)))
        .collect()
}

pub fn small_config() -> TrainerConfig {
    let mut config = TrainerConfig::default();
    config.cv_folds = 3;
    config.forest.n_estimators = 15;
    config.forest.max_depth = Some(6);
    config.boosting.n_estimators = 15;
    config.boosting.max_depth = Some(3);
    config
}

pub fn integrated_without_conduct() -> IntegratedData {
    let mut tables = tables();
    tables.conduct = None;
    let (tables, _) = schema::normalize(tables);
    integrate(&tables, &MethodCatalog).expect("fixture tables integrate")
}

/// Trained once per test binary.
pub fn trained() -> &'static TrainedArtifacts {
    static ARTIFACTS: OnceLock<TrainedArtifacts> = OnceLock::new();
    ARTIFACTS.get_or_init(|| {
        TrainedArtifacts::build(tables(), &corpora(), &small_config(), false).expect("fixture tables train")
    })
}
