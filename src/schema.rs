use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::config::{MERGED_SUBJECT, SUBJECT_ALIASES};
use crate::loader::RawTables;

pub fn canonical_subject(raw: &str) -> String {
    let trimmed = raw.trim();
    SUBJECT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map_or_else(|| trimmed.to_string(), |(_, canonical)| canonical.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    pub valid_subjects: BTreeSet<String>,
    pub dropped_rows: usize,
}

/// Applies subject aliases everywhere, keeps offerings of subjects described by both method
/// tables, and folds the retired subject code into its successor.
pub fn normalize(mut tables: RawTables) -> (RawTables, SchemaReport) {
    for row in &mut tables.grades {
        row.student_id = row.student_id.trim().to_string();
        row.lecturer_name = row.lecturer_name.trim().to_string();
        row.subject_id = canonical_subject(&row.subject_id);
    }
    tables.teaching = tables.teaching.map(|t| t.rename_subjects(canonical_subject));
    tables.assessment = tables.assessment.map(|t| t.rename_subjects(canonical_subject));
    for row in tables.demographics.iter_mut().flatten() {
        row.student_id = row.student_id.trim().to_string();
    }
    for row in tables.conduct.iter_mut().flatten() {
        row.student_id = row.student_id.trim().to_string();
    }
    for row in tables.self_study.iter_mut().flatten() {
        row.student_id = row.student_id.trim().to_string();
    }

    let (retired, successor) = MERGED_SUBJECT;
    let mut valid: BTreeSet<String> = match (&tables.teaching, &tables.assessment) {
        (Some(teaching), Some(assessment)) => teaching
            .subjects()
            .filter(|s| assessment.contains_subject(s))
            .map(str::to_string)
            .collect(),
        _ => {
            warn!("method tables incomplete; keeping every subject");
            tables.grades.iter().map(|r| r.subject_id.clone()).collect()
        }
    };
    if valid.contains(successor) {
        valid.insert(retired.to_string());
    }

    let before = tables.grades.len();
    tables.grades.retain(|row| valid.contains(&row.subject_id));
    for row in &mut tables.grades {
        if row.subject_id == retired {
            row.subject_id = successor.to_string();
        }
    }
    valid.remove(retired);
    let dropped_rows = before - tables.grades.len();
    info!(
        subjects = valid.len(),
        kept = tables.grades.len(),
        dropped = dropped_rows,
        "schema normalized"
    );

    (
        tables,
        SchemaReport {
            valid_subjects: valid,
            dropped_rows,
        },
    )
}
