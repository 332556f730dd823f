use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog::MethodCatalog;
use crate::config::{DataPaths, TrainerConfig};
use crate::error::ArtifactError;
use crate::exemplar::{self, DomainKey, DomainSummary, ExemplarBank, ExemplarRow};
use crate::integrate::{integrate, IntegratedData};
use crate::loader::{load_tables, RawTables};
use crate::schema;
use crate::trainer::{train, TrainedEnsemble};

const MODEL_FILE: &str = "model.bin";
const METADATA_FILE: &str = "metadata.json";
const STATS_FILE: &str = "model_stats.json";
const MODEL_TYPE: &str = "soft_voting(random_forest, gradient_boosting)";

/// Everything a prediction needs, built once by `train` and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedArtifacts {
    pub data: IntegratedData,
    pub ensemble: TrainedEnsemble,
    pub exemplars: ExemplarBank,
    pub tables_loaded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub trained_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub model_type: String,
    pub dataset_count: usize,
    pub total_records: usize,
    pub feature_count: usize,
    pub test_accuracy: f64,
    pub exemplar_models: Vec<DomainSummary>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl TrainedArtifacts {
    /// Normalizes, integrates and trains from tables already in memory.
    pub fn build(
        tables: RawTables,
        corpora: &BTreeMap<DomainKey, Vec<ExemplarRow>>,
        config: &TrainerConfig,
        optimize: bool,
    ) -> anyhow::Result<Self> {
        let tables_loaded = tables.loaded_count();
        let (tables, report) = schema::normalize(tables);
        info!(
            subjects = report.valid_subjects.len(),
            dropped = report.dropped_rows,
            "schema normalized"
        );
        let data = integrate(&tables, &MethodCatalog)?;
        let ensemble = train(&data, config, optimize)?;
        let exemplars = ExemplarBank::train(corpora);
        info!(domains = exemplars.trained_count(), "exemplar models ready");
        Ok(Self {
            data,
            ensemble,
            exemplars,
            tables_loaded,
        })
    }

    pub fn train_from(paths: &DataPaths, config: &TrainerConfig, optimize: bool) -> anyhow::Result<Self> {
        let tables = load_tables(paths)?;
        let corpora = exemplar::load_corpora(paths);
        Self::build(tables, &corpora, config, optimize)
    }

    pub fn metadata(&self) -> ArtifactMetadata {
        ArtifactMetadata {
            trained_at: Utc::now(),
            run_id: Uuid::new_v4(),
            model_type: MODEL_TYPE.to_string(),
            dataset_count: self.tables_loaded,
            total_records: self.data.records.len(),
            feature_count: self.ensemble.feature_names.len(),
            test_accuracy: self.ensemble.report.ensemble_accuracy,
            exemplar_models: self.exemplars.summaries(),
        }
    }

    /// Writes the model blob, its metadata and, after a search, the search summary.
    pub fn save(&self, dir: &Path) -> Result<ArtifactMetadata, ArtifactError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let blob_path = model_path(dir);
        let file = File::create(&blob_path).map_err(io_error(&blob_path))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush().map_err(io_error(&blob_path))?;

        let metadata = self.metadata();
        let metadata_path = dir.join(METADATA_FILE);
        let file = File::create(&metadata_path).map_err(io_error(&metadata_path))?;
        serde_json::to_writer_pretty(file, &metadata)?;

        if let Some(search) = &self.ensemble.report.search {
            let stats_path = dir.join(STATS_FILE);
            let file = File::create(&stats_path).map_err(io_error(&stats_path))?;
            serde_json::to_writer_pretty(file, search)?;
        }
        info!(dir = %dir.display(), run_id = %metadata.run_id, "artifacts saved");
        Ok(metadata)
    }

    /// Loads a saved bundle; a missing blob is an error, never a reason to retrain.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let blob_path = model_path(dir);
        if !blob_path.exists() {
            return Err(ArtifactError::Missing(dir.to_path_buf()));
        }
        let file = File::open(&blob_path).map_err(io_error(&blob_path))?;
        let mut artifacts: Self = bincode::deserialize_from(BufReader::new(file))?;
        artifacts.data.matrix.reindex();
        Ok(artifacts)
    }

    pub fn load_metadata(dir: &Path) -> Result<ArtifactMetadata, ArtifactError> {
        let path = dir.join(METADATA_FILE);
        let file = File::open(&path).map_err(io_error(&path))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

pub fn model_path(dir: &Path) -> PathBuf {
    dir.join(MODEL_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::predictor::Predictor;

    #[test]
    fn missing_blob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainedArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Missing(_)));
    }

    #[test]
    fn saved_artifacts_predict_identically() {
        let artifacts = fixtures::trained();
        let dir = tempfile::tempdir().unwrap();
        let metadata = artifacts.save(dir.path()).unwrap();
        assert!(model_path(dir.path()).exists());
        assert_eq!(metadata.total_records, artifacts.data.records.len());
        assert_eq!(metadata.feature_count, artifacts.ensemble.feature_names.len());

        let reloaded = TrainedArtifacts::load(dir.path()).unwrap();
        let stored = TrainedArtifacts::load_metadata(dir.path()).unwrap();
        assert_eq!(stored.run_id, metadata.run_id);
        assert_eq!(stored.dataset_count, 6);

        let before = Predictor::new(artifacts).predict("SV04", "Le Van C", "INF0263");
        let after = Predictor::new(&reloaded).predict("SV04", "Le Van C", "INF0263");
        assert_eq!(
            before.prediction().unwrap().prob_pass,
            after.prediction().unwrap().prob_pass
        );
    }

    #[test]
    fn corrupt_blob_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(model_path(dir.path()), b"not a model").unwrap();
        assert!(matches!(
            TrainedArtifacts::load(dir.path()),
            Err(ArtifactError::Codec(_))
        ));
    }
}
