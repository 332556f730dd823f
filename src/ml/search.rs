//! Randomized hyperparameter search scored by stratified cross-validated accuracy.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::boosting::BoostingParams;
use super::forest::ForestParams;
use super::linear::LogisticParams;
use super::metrics::{accuracy, mean_std};
use super::split::stratified_folds;
use super::tree::MaxFeatures;
use super::{Classifier, Dataset, Model, ModelError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CandidateParams {
    Linear(LogisticParams),
    Forest(ForestParams),
    Boosting(BoostingParams),
}

impl CandidateParams {
    pub fn fit(&self, data: &Dataset) -> Result<Model, ModelError> {
        Ok(match self {
            CandidateParams::Linear(p) => Model::Logistic(p.fit(data)?),
            CandidateParams::Forest(p) => Model::Forest(p.fit(data)?),
            CandidateParams::Boosting(p) => Model::Boosting(p.fit(data)?),
        })
    }
}

pub fn linear_grid(base: &LogisticParams) -> Vec<CandidateParams> {
    let mut grid = Vec::new();
    for c in [0.01, 0.1, 1.0, 10.0, 100.0] {
        for max_iter in [500, 1000] {
            grid.push(CandidateParams::Linear(LogisticParams {
                c,
                max_iter,
                ..base.clone()
            }));
        }
    }
    grid
}

pub fn forest_grid(base: &ForestParams) -> Vec<CandidateParams> {
    let mut grid = Vec::new();
    for n_estimators in [100, 200, 300, 400] {
        for max_depth in [Some(5), Some(10), Some(15), Some(20), None] {
            for min_samples_leaf in [1, 2, 4, 8] {
                for max_features in [MaxFeatures::Sqrt, MaxFeatures::Log2, MaxFeatures::All] {
                    grid.push(CandidateParams::Forest(ForestParams {
                        n_estimators,
                        max_depth,
                        min_samples_leaf,
                        max_features,
                        ..base.clone()
                    }));
                }
            }
        }
    }
    grid
}

pub fn boosting_grid(base: &BoostingParams) -> Vec<CandidateParams> {
    let mut grid = Vec::new();
    for n_estimators in [100, 200, 300, 400] {
        for learning_rate in [0.01, 0.05, 0.1, 0.2] {
            for max_depth in [3, 5, 7, 10] {
                for subsample in [0.8, 1.0] {
                    grid.push(CandidateParams::Boosting(BoostingParams {
                        n_estimators,
                        learning_rate,
                        max_depth: Some(max_depth),
                        subsample,
                        ..base.clone()
                    }));
                }
            }
        }
    }
    grid
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub params: CandidateParams,
    pub mean_accuracy: f64,
    pub std_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: CandidateParams,
    pub best_score: f64,
    pub trials: Vec<Trial>,
}

pub fn cross_val_accuracy(
    params: &CandidateParams,
    data: &Dataset,
    folds: &[(Vec<usize>, Vec<usize>)],
) -> Result<Vec<f64>, ModelError> {
    folds
        .iter()
        .map(|(train, validation)| {
            let model = params.fit(&data.subset(train))?;
            let truth: Vec<usize> = validation.iter().map(|&i| data.y[i]).collect();
            let predicted: Vec<usize> = validation.iter().map(|&i| model.predict(&data.x[i])).collect();
            Ok(accuracy(&truth, &predicted))
        })
        .collect()
}

/// Samples up to `n_iter` distinct candidates and keeps the best mean fold accuracy.
///
/// Candidates are evaluated in parallel; ties keep the earlier sampled candidate.
pub fn randomized_search(
    grid: &[CandidateParams],
    data: &Dataset,
    n_iter: usize,
    n_folds: usize,
    seed: u64,
) -> Result<SearchOutcome, ModelError> {
    if grid.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    data.ensure_trainable()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let picked = index::sample(&mut rng, grid.len(), n_iter.min(grid.len())).into_vec();
    let folds = stratified_folds(&data.y, n_folds, seed);

    let trials: Vec<Trial> = picked
        .par_iter()
        .map(|&i| {
            let params = grid[i].clone();
            let scores = cross_val_accuracy(&params, data, &folds)?;
            let (mean_accuracy, std_accuracy) = mean_std(&scores);
            debug!(candidate = i, mean_accuracy, "search candidate scored");
            Ok(Trial {
                params,
                mean_accuracy,
                std_accuracy,
            })
        })
        .collect::<Result<_, ModelError>>()?;

    let mut best = 0;
    for (i, trial) in trials.iter().enumerate() {
        if trial.mean_accuracy > trials[best].mean_accuracy {
            best = i;
        }
    }
    Ok(SearchOutcome {
        best: trials[best].params.clone(),
        best_score: trials[best].mean_accuracy,
        trials,
    })
}
