use std::path::PathBuf;

use crate::encoding::CategoricalField;
use crate::features::FeatureGroup;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("unknown {field} value '{value}'")]
    UnknownValue {
        field: CategoricalField,
        value: String,
    },
    #[error("no encoder fitted for {0}")]
    NotFitted(CategoricalField),
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("{0} table was not loaded")]
    MissingTable(&'static str),
    #[error("{table} table has no usable '{column}' column")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("{group} join produced {found} rows for {expected} records")]
    RowMismatch {
        group: FeatureGroup,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Invalid student ID: {0}")]
    UnknownStudent(String),
    #[error("Invalid subject ID: {0}")]
    UnknownSubject(String),
    #[error("Cannot build prediction row: no processed records for student {0}")]
    NoStudentRows(String),
    #[error("feature '{0}' missing from the prediction row")]
    MissingFeature(String),
    #[error("Prediction error: {0}")]
    Model(#[from] crate::ml::ModelError),
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("no trained artifacts at {0}; run `train` first")]
    Missing(PathBuf),
    #[error("failed to access artifacts at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact blob could not be encoded or decoded")]
    Codec(#[from] bincode::Error),
    #[error("artifact metadata is invalid")]
    Metadata(#[from] serde_json::Error),
}
