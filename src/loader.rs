use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::normalize_code;
use crate::config::{DataPaths, ASSESSMENT_COLUMN_PREFIX, TEACHING_COLUMN_PREFIX};
use crate::error::JoinError;
use crate::models::{ConductRow, DemographicRow, GradeRow, SelfStudyRow};

/// Methods in use per subject, keyed by normalized method code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodTable {
    by_subject: BTreeMap<String, BTreeSet<String>>,
}

impl MethodTable {
    pub fn insert(&mut self, subject: impl Into<String>, codes: impl IntoIterator<Item = String>) {
        self.by_subject
            .entry(subject.into())
            .or_default()
            .extend(codes);
    }

    pub fn contains_subject(&self, subject: &str) -> bool {
        self.by_subject.contains_key(subject)
    }

    pub fn used(&self, subject: &str) -> Option<&BTreeSet<String>> {
        self.by_subject.get(subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.by_subject.keys().map(String::as_str)
    }

    /// Re-keys subjects through `rename`, merging rows that collide.
    pub fn rename_subjects(self, rename: impl Fn(&str) -> String) -> Self {
        let mut renamed = MethodTable::default();
        for (subject, codes) in self.by_subject {
            renamed.insert(rename(&subject), codes);
        }
        renamed
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawTables {
    pub grades: Vec<GradeRow>,
    pub teaching: Option<MethodTable>,
    pub assessment: Option<MethodTable>,
    pub demographics: Option<Vec<DemographicRow>>,
    pub conduct: Option<Vec<ConductRow>>,
    pub self_study: Option<Vec<SelfStudyRow>>,
}

impl RawTables {
    /// Number of source tables that were actually loaded.
    pub fn loaded_count(&self) -> usize {
        1 + usize::from(self.teaching.is_some())
            + usize::from(self.assessment.is_some())
            + usize::from(self.demographics.is_some())
            + usize::from(self.conduct.is_some())
            + usize::from(self.self_study.is_some())
    }
}

pub fn load_tables(paths: &DataPaths) -> anyhow::Result<RawTables> {
    let grades: Vec<GradeRow> = read_rows(&paths.grades())
        .with_context(|| format!("failed to read grades from {}", paths.grades().display()))?;
    info!(root = %paths.root().display(), rows = grades.len(), "loaded grade records");

    Ok(RawTables {
        grades,
        teaching: optional(
            "teaching methods",
            read_method_table(&paths.teaching_methods(), "teaching methods", TEACHING_COLUMN_PREFIX),
        ),
        assessment: optional(
            "assessment methods",
            read_method_table(&paths.assessment_methods(), "assessment methods", ASSESSMENT_COLUMN_PREFIX),
        ),
        demographics: optional("demographics", read_rows(&paths.demographics())),
        conduct: optional("conduct", read_rows(&paths.conduct())),
        self_study: optional("self-study", read_rows(&paths.self_study())),
    })
}

fn optional<T>(table: &str, result: anyhow::Result<T>) -> Option<T> {
    match result {
        Ok(rows) => Some(rows),
        Err(err) => {
            warn!(table, error = %format!("{err:#}"), "auxiliary table unavailable");
            None
        }
    }
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<T>().enumerate() {
        let row = result.with_context(|| format!("{} row {}", path.display(), line + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Reads a subject-by-method flag table. Columns whose header starts with `prefix` are method
/// flags; a non-empty cell other than `nan` marks the method as used.
pub fn read_method_table(path: &Path, name: &'static str, prefix: &str) -> anyhow::Result<MethodTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let subject_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("subject_id"))
        .ok_or(JoinError::MissingColumn {
            table: name,
            column: "subject_id",
        })
        .with_context(|| format!("cannot key {} by subject", path.display()))?;
    let method_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.trim().to_uppercase().starts_with(prefix))
        .map(|(i, h)| (i, normalize_code(h)))
        .collect();

    let mut table = MethodTable::default();
    for record in reader.records() {
        let record = record?;
        let Some(subject) = record.get(subject_col).filter(|s| !s.is_empty()) else {
            continue;
        };
        let used = method_cols
            .iter()
            .filter(|(i, _)| record.get(*i).is_some_and(is_marked))
            .map(|(_, code)| code.clone());
        table.insert(subject.to_string(), used);
    }
    Ok(table)
}

fn is_marked(cell: &str) -> bool {
    let cell = cell.trim();
    !cell.is_empty() && !cell.eq_ignore_ascii_case("nan")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_table_reads_flag_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessment_methods.csv");
        std::fs::write(
            &path,
            "subject_id,EM 1,EM 2,EM11,notes\nINF0263,X,,x,core\nPLO0043,,nan,,\n",
        )
        .unwrap();

        let table = read_method_table(&path, "assessment methods", "EM").unwrap();
        let used: Vec<&str> = table.used("INF0263").unwrap().iter().map(String::as_str).collect();
        assert_eq!(used, vec!["EM1", "EM11"]);
        assert!(table.used("PLO0043").unwrap().is_empty());
        assert_eq!(table.subjects().count(), 2);
    }

    #[test]
    fn missing_auxiliary_tables_do_not_fail_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("grades.csv"),
            "student_id,lecturer_name,subject_id,exam_score,summary_score,year,semester\n\
             SV01,Nguyen Van A,INF0263,7.5,8,2223,1\n",
        )
        .unwrap();

        let tables = load_tables(&DataPaths::new(dir.path())).unwrap();
        assert_eq!(tables.grades.len(), 1);
        assert!(tables.conduct.is_none());
        assert!(tables.teaching.is_none());
        assert_eq!(tables.loaded_count(), 1);
    }

    #[test]
    fn method_table_without_subject_column_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let grades = "student_id,lecturer_name,subject_id,exam_score,summary_score,year,semester\n\
                      SV01,Nguyen Van A,INF0263,7.5,8,2223,1\n";
        std::fs::write(dir.path().join("grades.csv"), grades).unwrap();
        let teaching = dir.path().join("teaching_methods.csv");
        std::fs::write(&teaching, "course,TM1,TM2\nINF0263,x,\n").unwrap();

        let err = read_method_table(&teaching, "teaching methods", "TM").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JoinError>(),
            Some(JoinError::MissingColumn {
                table: "teaching methods",
                column: "subject_id"
            })
        ));

        let tables = load_tables(&DataPaths::new(dir.path())).unwrap();
        assert!(tables.teaching.is_none());
        assert_eq!(tables.grades.len(), 1);
    }

    #[test]
    fn missing_grades_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_tables(&DataPaths::new(dir.path())).is_err());
    }

    #[test]
    fn renaming_merges_alias_rows() {
        let mut table = MethodTable::default();
        table.insert("POL0043", vec!["EM1".to_string()]);
        table.insert("PLO0043", vec!["EM6".to_string()]);
        let table = table.rename_subjects(|s| s.replace("POL", "PLO"));
        assert_eq!(table.used("PLO0043").unwrap().len(), 2);
    }
}
