//! Severity classifiers over the six remediation corpora.
//!
//! Every domain trains the same way: a forest and a boosting ensemble compete on a stratified
//! holdout and the winner predicts the severity of a normalized signal. Exemplar reason and
//! solution rows of that severity are then sampled deterministically.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{exemplar_boosting_params, exemplar_forest_params, DataPaths, EXEMPLAR_PAD_VALUE, RANDOM_SEED};
use crate::encoding::{CategoricalField, EncoderRegistry};
use crate::ml::metrics::accuracy;
use crate::ml::split::stratified_split;
use crate::ml::{Classifier, Dataset, Model, ModelError};
use crate::models::Severity;

const EXEMPLAR_TEST_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainKey {
    TeachingMethods,
    EvaluationMethods,
    StudentConduct,
    AcademicMidterm,
    CloAttendance,
    SelfStudy,
}

impl DomainKey {
    pub const ALL: [DomainKey; 6] = [
        DomainKey::TeachingMethods,
        DomainKey::EvaluationMethods,
        DomainKey::StudentConduct,
        DomainKey::AcademicMidterm,
        DomainKey::CloAttendance,
        DomainKey::SelfStudy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DomainKey::TeachingMethods => "teaching_methods",
            DomainKey::EvaluationMethods => "evaluation_methods",
            DomainKey::StudentConduct => "student_conduct",
            DomainKey::AcademicMidterm => "academic_midterm",
            DomainKey::CloAttendance => "clo_attendance",
            DomainKey::SelfStudy => "self_study",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    /// Corpus column holding the domain score, if the domain has one.
    pub fn score_column(self) -> Option<&'static str> {
        match self {
            DomainKey::TeachingMethods => Some("teaching_method_pred"),
            DomainKey::EvaluationMethods => Some("evaluation_method_pred"),
            DomainKey::StudentConduct => Some("conduct_score_pred"),
            DomainKey::AcademicMidterm => Some("midterm_score"),
            DomainKey::CloAttendance => Some("clo_score_pred"),
            DomainKey::SelfStudy => None,
        }
    }

    pub fn corpus_stem(self) -> &'static str {
        self.as_str()
    }

    pub fn description(self) -> &'static str {
        match self {
            DomainKey::TeachingMethods => "Teaching methods",
            DomainKey::EvaluationMethods => "Evaluation methods",
            DomainKey::StudentConduct => "Student conduct",
            DomainKey::AcademicMidterm => "Midterm results",
            DomainKey::CloAttendance => "CLO and attendance",
            DomainKey::SelfStudy => "Self-study",
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compile-time tag for one problem domain.
pub trait ProblemDomain: fmt::Debug + Clone + Send + Sync + 'static {
    const KEY: DomainKey;
}

macro_rules! problem_domain {
    ($name:ident, $key:expr) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl ProblemDomain for $name {
            const KEY: DomainKey = $key;
        }
    };
}

problem_domain!(TeachingMethods, DomainKey::TeachingMethods);
problem_domain!(EvaluationMethods, DomainKey::EvaluationMethods);
problem_domain!(StudentConduct, DomainKey::StudentConduct);
problem_domain!(AcademicMidterm, DomainKey::AcademicMidterm);
problem_domain!(CloAttendance, DomainKey::CloAttendance);
problem_domain!(SelfStudy, DomainKey::SelfStudy);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExemplarRow {
    pub score: Option<f64>,
    pub severity: Severity,
    pub reason: String,
    pub solution: String,
    pub problem_type: Option<String>,
    pub audience: Option<String>,
}

impl ExemplarRow {
    fn features(&self, key: DomainKey) -> Vec<f64> {
        let mut features = Vec::with_capacity(3);
        if key.score_column().is_some() {
            features.push(self.score.unwrap_or(0.0));
        }
        features.push(self.reason.chars().count() as f64);
        features.push(self.solution.chars().count() as f64);
        features
    }
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|name| h.eq_ignore_ascii_case(name)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Reads one corpus. Rows whose severity label is not recognized are skipped.
pub fn load_corpus(path: &Path, key: DomainKey) -> anyhow::Result<Vec<ExemplarRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let severity_col = column(&headers, &["severity_level"])
        .with_context(|| format!("{} has no severity_level column", path.display()))?;
    let reason_col = column(&headers, &["reason_text"])
        .with_context(|| format!("{} has no reason_text column", path.display()))?;
    let solution_col = column(&headers, &["solution_text"])
        .with_context(|| format!("{} has no solution_text column", path.display()))?;
    let score_col = key.score_column().and_then(|name| column(&headers, &[name]));
    let problem_col = column(&headers, &["problem_type"]);
    let audience_col = column(&headers, &["target_audience", "audience"]);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        let Some(severity) = record.get(severity_col).and_then(Severity::parse) else {
            skipped += 1;
            continue;
        };
        rows.push(ExemplarRow {
            score: score_col
                .and_then(|i| record.get(i))
                .and_then(|v| v.trim().parse::<f64>().ok()),
            severity,
            reason: record.get(reason_col).unwrap_or_default().to_string(),
            solution: record.get(solution_col).unwrap_or_default().to_string(),
            problem_type: non_empty(problem_col.and_then(|i| record.get(i))),
            audience: non_empty(audience_col.and_then(|i| record.get(i))),
        });
    }
    if skipped > 0 {
        warn!(domain = %key, skipped, "corpus rows with unrecognized severity skipped");
    }
    Ok(rows)
}

/// Loads every corpus that exists; missing ones are logged and left out.
pub fn load_corpora(paths: &DataPaths) -> BTreeMap<DomainKey, Vec<ExemplarRow>> {
    let mut corpora = BTreeMap::new();
    for key in DomainKey::ALL {
        let path = paths.exemplar_corpus(key.corpus_stem());
        match load_corpus(&path, key) {
            Ok(rows) => {
                info!(domain = %key, rows = rows.len(), "exemplar corpus loaded");
                corpora.insert(key, rows);
            }
            Err(err) => warn!(domain = %key, error = %format!("{err:#}"), "exemplar corpus unavailable"),
        }
    }
    corpora
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExemplarPrediction {
    pub domain: DomainKey,
    pub severity: Severity,
    pub confidence: f64,
    pub rows: Vec<ExemplarRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SeverityExemplarModel<D: ProblemDomain> {
    registry: EncoderRegistry,
    classifier: Model,
    accuracy: f64,
    corpus: Vec<ExemplarRow>,
    #[serde(skip)]
    domain: PhantomData<D>,
}

impl<D: ProblemDomain> SeverityExemplarModel<D> {
    pub fn train(corpus: Vec<ExemplarRow>) -> Result<Self, ModelError> {
        if corpus.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        let mut registry = EncoderRegistry::new();
        let severities = registry.fit(CategoricalField::SeverityLevel, corpus.iter().map(|r| r.severity.as_str()));
        let n_classes = severities.len();
        let y: Vec<usize> = corpus
            .iter()
            .map(|r| severities.code(r.severity.as_str()).unwrap_or(0))
            .collect();
        registry.fit(CategoricalField::ProblemType, corpus.iter().filter_map(|r| r.problem_type.as_deref()));
        registry.fit(CategoricalField::Audience, corpus.iter().filter_map(|r| r.audience.as_deref()));

        let x: Vec<Vec<f64>> = corpus.iter().map(|r| r.features(D::KEY)).collect();
        let data = Dataset::new(x, y, n_classes)?;
        data.ensure_trainable()?;

        let (train_idx, test_idx) = stratified_split(&data.y, EXEMPLAR_TEST_FRACTION, RANDOM_SEED);
        let train = data.subset(&train_idx);
        let test = if test_idx.is_empty() { train.clone() } else { data.subset(&test_idx) };

        let forest = Model::Forest(exemplar_forest_params().fit(&train)?);
        let boosting = Model::Boosting(exemplar_boosting_params().fit(&train)?);
        let forest_accuracy = holdout_accuracy(&forest, &test);
        let boosting_accuracy = holdout_accuracy(&boosting, &test);
        let (classifier, accuracy) = if forest_accuracy >= boosting_accuracy {
            (forest, forest_accuracy)
        } else {
            (boosting, boosting_accuracy)
        };
        info!(
            domain = %D::KEY,
            forest = forest_accuracy,
            boosting = boosting_accuracy,
            chosen = classifier.kind(),
            "severity model trained"
        );
        Ok(Self {
            registry,
            classifier,
            accuracy,
            corpus,
            domain: PhantomData,
        })
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn model_kind(&self) -> &'static str {
        self.classifier.kind()
    }

    pub fn corpus(&self) -> &[ExemplarRow] {
        &self.corpus
    }

    pub fn problem_types(&self) -> &[String] {
        self.registry
            .get(CategoricalField::ProblemType)
            .map(|encoder| encoder.values())
            .unwrap_or(&[])
    }

    /// Predicts a severity for `features` and samples up to `k` exemplar rows of it.
    ///
    /// Missing trailing features are padded; the sample is stable for a given corpus.
    pub fn predict_reason_solution(&self, features: &[f64], k: usize) -> ExemplarPrediction {
        let width = self.classifier.n_features();
        let mut row: Vec<f64> = features.iter().take(width).copied().collect();
        row.resize(width, EXEMPLAR_PAD_VALUE);

        let proba = self.classifier.predict_proba(&row);
        let class = crate::ml::argmax(&proba);
        let severity = self
            .registry
            .decode(CategoricalField::SeverityLevel, class)
            .and_then(Severity::parse)
            .unwrap_or(Severity::Medium);
        let confidence = proba.get(class).copied().unwrap_or(0.0);

        let mut pool: Vec<&ExemplarRow> = self.corpus.iter().filter(|r| r.severity == severity).collect();
        if pool.is_empty() {
            pool = self.corpus.iter().collect();
        }
        let rows = if k >= pool.len() {
            pool.into_iter().cloned().collect()
        } else {
            let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
            pool.choose_multiple(&mut rng, k).map(|r| (*r).clone()).collect()
        };
        ExemplarPrediction {
            domain: D::KEY,
            severity,
            confidence,
            rows,
        }
    }
}

fn holdout_accuracy(model: &Model, test: &Dataset) -> f64 {
    let predicted: Vec<usize> = test.x.iter().map(|row| model.predict(row)).collect();
    accuracy(&test.y, &predicted)
}

/// Summary of one trained domain, as listed in metadata and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain: DomainKey,
    pub model_type: String,
    pub accuracy: f64,
    pub corpus_size: usize,
    pub problem_types: Vec<String>,
}

/// One optional model per domain; absent domains simply yield no exemplars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExemplarBank {
    teaching_methods: Option<SeverityExemplarModel<TeachingMethods>>,
    evaluation_methods: Option<SeverityExemplarModel<EvaluationMethods>>,
    student_conduct: Option<SeverityExemplarModel<StudentConduct>>,
    academic_midterm: Option<SeverityExemplarModel<AcademicMidterm>>,
    clo_attendance: Option<SeverityExemplarModel<CloAttendance>>,
    self_study: Option<SeverityExemplarModel<SelfStudy>>,
}

fn train_domain<D: ProblemDomain>(corpora: &BTreeMap<DomainKey, Vec<ExemplarRow>>) -> Option<SeverityExemplarModel<D>> {
    let corpus = corpora.get(&D::KEY)?;
    match SeverityExemplarModel::<D>::train(corpus.clone()) {
        Ok(model) => Some(model),
        Err(err) => {
            warn!(domain = %D::KEY, error = %err, "no severity model for domain");
            None
        }
    }
}

fn summarize<D: ProblemDomain>(model: &Option<SeverityExemplarModel<D>>) -> Option<DomainSummary> {
    model.as_ref().map(|m| DomainSummary {
        domain: D::KEY,
        model_type: m.model_kind().to_string(),
        accuracy: m.accuracy(),
        corpus_size: m.corpus().len(),
        problem_types: m.problem_types().to_vec(),
    })
}

impl ExemplarBank {
    pub fn train(corpora: &BTreeMap<DomainKey, Vec<ExemplarRow>>) -> Self {
        Self {
            teaching_methods: train_domain(corpora),
            evaluation_methods: train_domain(corpora),
            student_conduct: train_domain(corpora),
            academic_midterm: train_domain(corpora),
            clo_attendance: train_domain(corpora),
            self_study: train_domain(corpora),
        }
    }

    /// `None` when the domain has no trained model.
    pub fn predict(&self, key: DomainKey, features: &[f64], k: usize) -> Option<ExemplarPrediction> {
        match key {
            DomainKey::TeachingMethods => self.teaching_methods.as_ref().map(|m| m.predict_reason_solution(features, k)),
            DomainKey::EvaluationMethods => self
                .evaluation_methods
                .as_ref()
                .map(|m| m.predict_reason_solution(features, k)),
            DomainKey::StudentConduct => self.student_conduct.as_ref().map(|m| m.predict_reason_solution(features, k)),
            DomainKey::AcademicMidterm => self.academic_midterm.as_ref().map(|m| m.predict_reason_solution(features, k)),
            DomainKey::CloAttendance => self.clo_attendance.as_ref().map(|m| m.predict_reason_solution(features, k)),
            DomainKey::SelfStudy => self.self_study.as_ref().map(|m| m.predict_reason_solution(features, k)),
        }
    }

    pub fn summaries(&self) -> Vec<DomainSummary> {
        [
            summarize(&self.teaching_methods),
            summarize(&self.evaluation_methods),
            summarize(&self.student_conduct),
            summarize(&self.academic_midterm),
            summarize(&self.clo_attendance),
            summarize(&self.self_study),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn trained_count(&self) -> usize {
        self.summaries().len()
    }
}
