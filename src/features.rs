use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ABSENT_MARKER;
use crate::error::JoinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureGroup {
    Identity,
    Demographic,
    Conduct,
    SelfStudy,
    TeachingMethods,
    AssessmentMethods,
    History,
}

impl fmt::Display for FeatureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureGroup::Identity => "identity",
            FeatureGroup::Demographic => "demographic",
            FeatureGroup::Conduct => "conduct",
            FeatureGroup::SelfStudy => "self-study",
            FeatureGroup::TeachingMethods => "teaching methods",
            FeatureGroup::AssessmentMethods => "assessment methods",
            FeatureGroup::History => "history",
        };
        f.write_str(name)
    }
}

/// Columns contributed by one integration step, one row per offering record.
#[derive(Debug, Clone)]
pub struct GroupColumns {
    pub group: FeatureGroup,
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl GroupColumns {
    pub fn new(group: FeatureGroup, names: Vec<String>) -> Self {
        Self {
            group,
            names,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, values: Vec<f64>) {
        self.rows.push(values);
    }
}

#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Included(GroupColumns),
    Omitted { group: FeatureGroup, reason: String },
}

impl JoinOutcome {
    pub fn from_result(group: FeatureGroup, result: Result<GroupColumns, JoinError>) -> Self {
        match result {
            Ok(columns) => JoinOutcome::Included(columns),
            Err(err) => {
                warn!(%group, error = %err, "feature group omitted");
                JoinOutcome::Omitted {
                    group,
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureManifest {
    pub included: Vec<FeatureGroup>,
    pub omitted: Vec<(FeatureGroup, String)>,
}

impl FeatureManifest {
    pub fn includes(&self, group: FeatureGroup) -> bool {
        self.included.contains(&group)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl FeatureMatrix {
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            names: Vec::new(),
            rows: vec![Vec::new(); n_rows],
            lookup: HashMap::new(),
        }
    }

    pub fn append(&mut self, columns: GroupColumns) -> Result<(), JoinError> {
        if columns.rows.len() != self.n_rows() {
            return Err(JoinError::RowMismatch {
                group: columns.group,
                expected: self.n_rows(),
                found: columns.rows.len(),
            });
        }
        for (row, values) in self.rows.iter_mut().zip(columns.rows) {
            row.extend(values);
        }
        for name in columns.names {
            self.lookup.insert(name.clone(), self.names.len());
            self.names.push(name);
        }
        Ok(())
    }

    /// Rebuilds the name index after deserialization.
    pub fn reindex(&mut self) {
        self.lookup = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        self.index_of(name).map(|col| self.rows[row][col])
    }

    /// Projects every row onto `columns`, which must all be present.
    pub fn select(&self, columns: &[usize]) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| columns.iter().map(|&c| row[c]).collect())
            .collect()
    }
}

/// Parses a raw score cell: `VT` and unparseable text become 0, decimal commas are accepted.
pub fn coerce_score(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case(ABSENT_MARKER) {
        return 0.0;
    }
    safe_float(&trimmed.replace(',', "."))
}

pub fn safe_float(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}
