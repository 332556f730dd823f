use std::cmp::Ordering;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{TrainerConfig, ASSESSMENT_COLUMN_PREFIX, MODEL_FEATURES, TEACHING_COLUMN_PREFIX, TOP_IMPORTANCES};
use crate::features::{FeatureGroup, FeatureManifest, FeatureMatrix};
use crate::integrate::IntegratedData;
use crate::ml::boosting::{BoostingParams, GradientBoosting};
use crate::ml::forest::{ForestParams, RandomForest};
use crate::ml::linear::LogisticRegression;
use crate::ml::metrics::{accuracy, mean_std, ClassificationReport, ConfusionMatrix};
use crate::ml::search::{boosting_grid, forest_grid, linear_grid, randomized_search, CandidateParams, SearchOutcome};
use crate::ml::split::{stratified_folds, stratified_split};
use crate::ml::voting::SoftVoting;
use crate::ml::{Classifier, Dataset, ModelError};
use crate::models::StudentOfferingRecord;

pub const CLASS_LABELS: [&str; 2] = ["Fail", "Pass"];
const PASS_CLASS: usize = 1;

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub feature_names: Vec<String>,
    pub dataset: Dataset,
}

fn is_method_column(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

/// Configured features the matrix actually carries, followed by the method indicator columns.
pub fn feature_columns(matrix: &FeatureMatrix, manifest: &FeatureManifest) -> Vec<String> {
    let mut names = Vec::new();
    for feature in MODEL_FEATURES {
        if matrix.index_of(feature).is_some() {
            names.push(feature.to_string());
        } else {
            warn!(feature, "configured feature not present; skipping");
        }
    }
    for (group, prefix) in [
        (FeatureGroup::TeachingMethods, TEACHING_COLUMN_PREFIX),
        (FeatureGroup::AssessmentMethods, ASSESSMENT_COLUMN_PREFIX),
    ] {
        if manifest.includes(group) {
            names.extend(
                matrix
                    .names()
                    .iter()
                    .filter(|name| is_method_column(name, prefix))
                    .cloned(),
            );
        }
    }
    names
}

pub fn labels(records: &[StudentOfferingRecord]) -> Vec<usize> {
    records.iter().map(|r| usize::from(r.passed)).collect()
}

fn column_indices(matrix: &FeatureMatrix, names: &[String]) -> anyhow::Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            matrix
                .index_of(name)
                .with_context(|| format!("feature '{name}' missing from the integrated matrix"))
        })
        .collect()
}

pub fn prepare(data: &IntegratedData) -> anyhow::Result<PreparedData> {
    let feature_names = feature_columns(&data.matrix, &data.manifest);
    prepare_with(data, feature_names)
}

fn prepare_with(data: &IntegratedData, feature_names: Vec<String>) -> anyhow::Result<PreparedData> {
    let columns = column_indices(&data.matrix, &feature_names)?;
    let dataset = Dataset::new(data.matrix.select(&columns), labels(&data.records), CLASS_LABELS.len())
        .context("cannot build the training dataset")?;
    info!(
        rows = dataset.len(),
        features = feature_names.len(),
        "prepared training data"
    );
    Ok(PreparedData {
        feature_names,
        dataset,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub linear: SearchOutcome,
    pub forest: SearchOutcome,
    pub boosting: SearchOutcome,
}

/// Randomized search over the three grids; returns the config with the winners substituted.
pub fn optimize(train: &Dataset, config: &TrainerConfig) -> Result<(TrainerConfig, SearchSummary), ModelError> {
    let search = |grid: Vec<CandidateParams>| {
        randomized_search(
            &grid,
            train,
            config.search_iterations,
            config.search_folds,
            config.seed,
        )
    };
    let summary = SearchSummary {
        linear: search(linear_grid(&config.linear))?,
        forest: search(forest_grid(&config.forest))?,
        boosting: search(boosting_grid(&config.boosting))?,
    };

    let mut tuned = config.clone();
    for outcome in [&summary.linear, &summary.forest, &summary.boosting] {
        info!(best_score = outcome.best_score, params = ?outcome.best, "search finished");
        match &outcome.best {
            CandidateParams::Linear(p) => tuned.linear = p.clone(),
            CandidateParams::Forest(p) => tuned.forest = p.clone(),
            CandidateParams::Boosting(p) => tuned.boosting = p.clone(),
        }
    }
    Ok((tuned, summary))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_size: usize,
    pub test_size: usize,
    pub linear_accuracy: f64,
    pub forest_accuracy: f64,
    pub boosting_accuracy: f64,
    pub ensemble_accuracy: f64,
    pub cv_mean: f64,
    pub cv_std: f64,
    pub top_importances: Vec<(String, f64)>,
    pub search: Option<SearchSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedEnsemble {
    pub feature_names: Vec<String>,
    pub linear: LogisticRegression,
    pub forest: RandomForest,
    pub boosting: GradientBoosting,
    pub report: TrainingReport,
}

impl TrainedEnsemble {
    /// The deployed scorer: forest and boosting averaged.
    pub fn voting(&self) -> SoftVoting<'_> {
        let members: Vec<&dyn Classifier> = vec![&self.forest, &self.boosting];
        SoftVoting::new(members)
    }

    pub fn prob_pass(&self, row: &[f64]) -> Result<f64, ModelError> {
        let voting = self.voting();
        voting.check_width(row)?;
        Ok(voting.predict_proba(row)[PASS_CLASS])
    }
}

fn held_out_accuracy(model: &dyn Classifier, data: &Dataset, rows: &[usize]) -> f64 {
    let truth: Vec<usize> = rows.iter().map(|&i| data.y[i]).collect();
    let predicted: Vec<usize> = rows.iter().map(|&i| model.predict(&data.x[i])).collect();
    accuracy(&truth, &predicted)
}

fn ensemble_cv(
    data: &Dataset,
    forest: &ForestParams,
    boosting: &BoostingParams,
    config: &TrainerConfig,
) -> Result<Vec<f64>, ModelError> {
    stratified_folds(&data.y, config.cv_folds, config.seed)
        .iter()
        .map(|(train, validation)| {
            let subset = data.subset(train);
            let f = forest.fit(&subset)?;
            let b = boosting.fit(&subset)?;
            let members: Vec<&dyn Classifier> = vec![&f, &b];
            let voting = SoftVoting::new(members);
            Ok(held_out_accuracy(&voting, data, validation))
        })
        .collect()
}

fn top_importances(names: &[String], forest: &RandomForest) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = names
        .iter()
        .cloned()
        .zip(forest.feature_importances().iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.truncate(TOP_IMPORTANCES);
    ranked
}

pub fn train(data: &IntegratedData, config: &TrainerConfig, optimize_params: bool) -> anyhow::Result<TrainedEnsemble> {
    let prepared = prepare(data)?;
    let dataset = &prepared.dataset;
    dataset.ensure_trainable().context("training data needs both passing and failing records")?;

    let (train_rows, test_rows) = stratified_split(&dataset.y, config.test_fraction, config.seed);
    let train_set = dataset.subset(&train_rows);
    info!(train = train_rows.len(), test = test_rows.len(), "split training data");

    let (config, search) = if optimize_params {
        let (tuned, summary) = optimize(&train_set, config).context("hyperparameter search failed")?;
        (tuned, Some(summary))
    } else {
        (config.clone(), None)
    };

    let linear = config.linear.fit(&train_set).context("logistic regression failed to fit")?;
    let forest = config.forest.fit(&train_set).context("random forest failed to fit")?;
    let boosting = config.boosting.fit(&train_set).context("gradient boosting failed to fit")?;

    let linear_accuracy = held_out_accuracy(&linear, dataset, &test_rows);
    let forest_accuracy = held_out_accuracy(&forest, dataset, &test_rows);
    let boosting_accuracy = held_out_accuracy(&boosting, dataset, &test_rows);
    let members: Vec<&dyn Classifier> = vec![&forest, &boosting];
    let ensemble_accuracy = held_out_accuracy(&SoftVoting::new(members), dataset, &test_rows);
    info!(
        linear_accuracy,
        forest_accuracy, boosting_accuracy, ensemble_accuracy, "held-out accuracy"
    );

    let cv_scores = ensemble_cv(dataset, &config.forest, &config.boosting, &config)
        .context("ensemble cross-validation failed")?;
    let (cv_mean, cv_std) = mean_std(&cv_scores);
    info!(cv_mean, cv_std, folds = cv_scores.len(), "ensemble cross-validation");

    let top_importances = top_importances(&prepared.feature_names, &forest);

    Ok(TrainedEnsemble {
        feature_names: prepared.feature_names,
        linear,
        forest,
        boosting,
        report: TrainingReport {
            train_size: train_rows.len(),
            test_size: test_rows.len(),
            linear_accuracy,
            forest_accuracy,
            boosting_accuracy,
            ensemble_accuracy,
            cv_mean,
            cv_std,
            top_importances,
            search,
        },
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
}

/// Scores the voting ensemble on the same held-out split used in training.
pub fn evaluate(
    ensemble: &TrainedEnsemble,
    data: &IntegratedData,
    config: &TrainerConfig,
) -> anyhow::Result<EvaluationReport> {
    let prepared = prepare_with(data, ensemble.feature_names.clone())?;
    let dataset = &prepared.dataset;
    let (_, test_rows) = stratified_split(&dataset.y, config.test_fraction, config.seed);

    let voting = ensemble.voting();
    let truth: Vec<usize> = test_rows.iter().map(|&i| dataset.y[i]).collect();
    let predicted: Vec<usize> = test_rows.iter().map(|&i| voting.predict(&dataset.x[i])).collect();

    Ok(EvaluationReport {
        accuracy: accuracy(&truth, &predicted),
        report: ClassificationReport::new(&truth, &predicted, &CLASS_LABELS),
        confusion: ConfusionMatrix::new(&truth, &predicted, &CLASS_LABELS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn omitted_groups_drop_their_configured_features() {
        let data = fixtures::integrated_without_conduct();
        let names = feature_columns(&data.matrix, &data.manifest);
        assert!(!names.iter().any(|n| n == "latest_conduct_score"));
        assert!(names.iter().any(|n| n == "pass_rate"));
        assert!(names.iter().any(|n| n == "EM1"));
        assert!(names.iter().any(|n| n == "TM21"));
        assert_eq!(names.iter().filter(|n| *n == "total_ppdg_count").count(), 1);
    }

    #[test]
    fn method_column_detection() {
        assert!(is_method_column("EM11", "EM"));
        assert!(is_method_column("TM3", "TM"));
        assert!(!is_method_column("EMx", "EM"));
        assert!(!is_method_column("total_ppdg_count", "EM"));
    }

    #[test]
    fn trained_ensemble_reports_sane_metrics() {
        let artifacts = fixtures::trained();
        let report = &artifacts.ensemble.report;
        for acc in [
            report.linear_accuracy,
            report.forest_accuracy,
            report.boosting_accuracy,
            report.ensemble_accuracy,
            report.cv_mean,
        ] {
            assert!((0.0..=1.0).contains(&acc));
        }
        assert!(report.ensemble_accuracy >= 0.6);
        assert!(report.top_importances.len() <= TOP_IMPORTANCES);
        assert!(report.search.is_none());
        assert_eq!(
            artifacts.ensemble.forest.n_features(),
            artifacts.ensemble.feature_names.len()
        );
    }

    #[test]
    fn evaluation_reuses_the_training_split() {
        let artifacts = fixtures::trained();
        let evaluation = evaluate(&artifacts.ensemble, &artifacts.data, &fixtures::small_config()).unwrap();
        let support: usize = evaluation.report.classes.iter().map(|c| c.support).sum();
        assert_eq!(support, artifacts.ensemble.report.test_size);
        assert_eq!(evaluation.confusion.labels, vec!["Fail".to_string(), "Pass".to_string()]);
        assert!((evaluation.accuracy - artifacts.ensemble.report.ensemble_accuracy).abs() < 1e-12);
    }

    #[test]
    fn prob_pass_rejects_wrong_width() {
        let artifacts = fixtures::trained();
        assert!(matches!(
            artifacts.ensemble.prob_pass(&[1.0, 2.0]),
            Err(ModelError::FeatureMismatch { .. })
        ));
    }
}
