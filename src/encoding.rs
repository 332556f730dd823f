use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EncodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CategoricalField {
    Student,
    Lecturer,
    Subject,
    Gender,
    Religion,
    BirthPlace,
    Ethnicity,
    ConductClassification,
    SeverityLevel,
    ProblemType,
    Audience,
}

impl fmt::Display for CategoricalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CategoricalField::Student => "student",
            CategoricalField::Lecturer => "lecturer",
            CategoricalField::Subject => "subject",
            CategoricalField::Gender => "gender",
            CategoricalField::Religion => "religion",
            CategoricalField::BirthPlace => "birth place",
            CategoricalField::Ethnicity => "ethnicity",
            CategoricalField::ConductClassification => "conduct classification",
            CategoricalField::SeverityLevel => "severity level",
            CategoricalField::ProblemType => "problem type",
            CategoricalField::Audience => "audience",
        };
        f.write_str(name)
    }
}

/// Sorted string-to-code table; codes are positions in the sorted distinct values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    values: Vec<String>,
    index: HashMap<String, usize>,
}

impl CategoricalEncoder {
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut distinct: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        distinct.sort();
        distinct.dedup();
        let index = distinct
            .iter()
            .enumerate()
            .map(|(code, value)| (value.clone(), code))
            .collect();
        Self {
            values: distinct,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.index.contains_key(value)
    }

    pub fn code(&self, value: &str) -> Option<usize> {
        self.index.get(value).copied()
    }

    pub fn decode(&self, code: usize) -> Option<&str> {
        self.values.get(code).map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Reserved code for values never seen in training; distinct from every fitted code.
    pub fn unknown_code(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncoderRegistry {
    encoders: BTreeMap<CategoricalField, CategoricalEncoder>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit<I, S>(&mut self, field: CategoricalField, values: I) -> &CategoricalEncoder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.encoders.insert(field, CategoricalEncoder::fit(values));
        &self.encoders[&field]
    }

    pub fn get(&self, field: CategoricalField) -> Option<&CategoricalEncoder> {
        self.encoders.get(&field)
    }

    pub fn encode(&self, field: CategoricalField, value: &str) -> Result<usize, EncodeError> {
        let encoder = self.get(field).ok_or(EncodeError::NotFitted(field))?;
        encoder.code(value).ok_or_else(|| EncodeError::UnknownValue {
            field,
            value: value.to_string(),
        })
    }

    pub fn decode(&self, field: CategoricalField, code: usize) -> Option<&str> {
        self.get(field).and_then(|encoder| encoder.decode(code))
    }

    /// Lecturers are the one field with an explicit fallback for unseen values.
    pub fn encode_lecturer(&self, name: &str) -> usize {
        match self.get(CategoricalField::Lecturer) {
            Some(encoder) => encoder.code(name).unwrap_or_else(|| encoder.unknown_code()),
            None => 0,
        }
    }

    /// Encodes `value`, substituting code 0 when it was never seen in training.
    pub fn encode_or_default(&self, field: CategoricalField, value: &str) -> usize {
        match self.encode(field, value) {
            Ok(code) => code,
            Err(err) => {
                warn!(%field, value, error = %err, "substituting default category code");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_sorted_order() {
        let encoder = CategoricalEncoder::fit(["SV03", "SV01", "SV02", "SV01"]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.code("SV01"), Some(0));
        assert_eq!(encoder.code("SV03"), Some(2));
        assert_eq!(encoder.decode(1), Some("SV02"));
    }

    #[test]
    fn unseen_student_is_an_error() {
        let mut registry = EncoderRegistry::new();
        registry.fit(CategoricalField::Student, ["A", "B"]);
        let err = registry.encode(CategoricalField::Student, "Z").unwrap_err();
        assert!(matches!(err, EncodeError::UnknownValue { field: CategoricalField::Student, .. }));
        assert_eq!(registry.encode_or_default(CategoricalField::Student, "Z"), 0);
    }

    #[test]
    fn unseen_lecturer_gets_reserved_code() {
        let mut registry = EncoderRegistry::new();
        registry.fit(CategoricalField::Lecturer, ["Le Van B", "Nguyen Thi A"]);
        assert_eq!(registry.encode_lecturer("Nguyen Thi A"), 1);
        assert_eq!(registry.encode_lecturer("Brand New Lecturer"), 2);
    }

    #[test]
    fn unfitted_field_is_reported() {
        let registry = EncoderRegistry::new();
        assert!(matches!(
            registry.encode(CategoricalField::Audience, "x"),
            Err(EncodeError::NotFitted(CategoricalField::Audience))
        ));
    }
}
