use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analyzer;
mod artifacts;
mod catalog;
mod cohort;
mod config;
mod encoding;
mod error;
mod exemplar;
mod features;
#[cfg(test)]
mod fixtures;
mod history;
mod integrate;
mod loader;
mod ml;
mod models;
mod ppdg;
mod predictor;
mod recommend;
mod report;
mod schema;
mod trainer;

use artifacts::TrainedArtifacts;
use config::{DataPaths, TrainerConfig};
use exemplar::DomainKey;
use predictor::Predictor;

#[derive(Parser)]
#[command(name = "clo-insight")]
#[command(about = "CLO score prediction with causal-factor explanations", long_about = None)]
struct Cli {
    /// Directory holding the source CSV tables (falls back to CLO_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Directory for trained artifacts (falls back to CLO_ARTIFACTS_DIR)
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the ensemble and the exemplar models, then save the artifacts
    Train {
        #[arg(long)]
        optimize: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Score the saved ensemble on the held-out split
    Evaluate,
    /// Predict and explain one student's score
    Predict {
        #[arg(long)]
        student: String,
        #[arg(long)]
        lecturer: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Predict a whole class for one lecturer and subject
    #[command(group(
        ArgGroup::new("roster")
            .args(["students", "students_file"])
            .required(true)
            .multiple(false)
    ))]
    Class {
        #[arg(long)]
        lecturer: String,
        #[arg(long)]
        subject: String,
        #[arg(long, value_delimiter = ',')]
        students: Vec<String>,
        #[arg(long)]
        students_file: Option<PathBuf>,
        #[arg(long, default_value = "class_report.md")]
        out: PathBuf,
    },
    /// Query one exemplar domain directly
    Exemplar {
        #[arg(long)]
        domain: String,
        /// Normalized domain signal in 0..1
        #[arg(long)]
        score: Option<f64>,
        #[arg(long, default_value_t = 3)]
        k: usize,
    },
}

fn dir_from(flag: Option<PathBuf>, var: &str, default: &str) -> PathBuf {
    flag.or_else(|| std::env::var_os(var).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn load_artifacts(dir: &Path) -> anyhow::Result<TrainedArtifacts> {
    TrainedArtifacts::load(dir).with_context(|| format!("failed to load artifacts from {}", dir.display()))
}

/// One student id per line; blank lines and `#` comments are ignored.
fn read_roster(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = dir_from(cli.data_dir, "CLO_DATA_DIR", "data");
    let artifacts_dir = dir_from(cli.artifacts_dir, "CLO_ARTIFACTS_DIR", "artifacts");

    match cli.command {
        Commands::Train { optimize, report } => {
            let paths = DataPaths::new(&data_dir);
            let artifacts = TrainedArtifacts::train_from(&paths, &TrainerConfig::default(), optimize)
                .with_context(|| format!("training from {} failed", data_dir.display()))?;
            let metadata = artifacts.save(&artifacts_dir)?;
            let summary = report::render_training(&artifacts.ensemble.report, &metadata);
            match report {
                Some(out) => {
                    std::fs::write(&out, summary)?;
                    println!("Training summary written to {}.", out.display());
                }
                None => print!("{summary}"),
            }
            println!("Artifacts saved to {}.", artifacts_dir.display());
        }
        Commands::Evaluate => {
            let artifacts = load_artifacts(&artifacts_dir)?;
            if let Ok(metadata) = TrainedArtifacts::load_metadata(&artifacts_dir) {
                println!(
                    "Model {} (run {}, trained {})",
                    metadata.model_type,
                    metadata.run_id,
                    metadata.trained_at.format("%Y-%m-%d %H:%M UTC")
                );
            }
            let evaluation = trainer::evaluate(&artifacts.ensemble, &artifacts.data, &TrainerConfig::default())?;
            print!("{}", report::render_evaluation(&evaluation));
        }
        Commands::Predict {
            student,
            lecturer,
            subject,
            json,
            out,
        } => {
            let artifacts = load_artifacts(&artifacts_dir)?;
            let result = Predictor::new(&artifacts).predict(&student, &lecturer, &subject);
            let rendered = if json {
                serde_json::to_string_pretty(&result.to_json())?
            } else {
                report::render_prediction(&result)
            };
            match out {
                Some(out) => {
                    std::fs::write(&out, rendered)?;
                    println!("Prediction written to {}.", out.display());
                }
                None => println!("{rendered}"),
            }
            if result.is_error() {
                std::process::exit(1);
            }
        }
        Commands::Class {
            lecturer,
            subject,
            students,
            students_file,
            out,
        } => {
            let roster = match students_file {
                Some(path) => read_roster(&path)?,
                None => students,
            };
            if roster.is_empty() {
                bail!("class roster is empty");
            }
            let artifacts = load_artifacts(&artifacts_dir)?;
            let class = cohort::analyze_class(&artifacts, &roster, &lecturer, &subject);
            std::fs::write(&out, report::render_class(&class))?;
            println!(
                "Scored {} of {} students ({} need attention). Report written to {}.",
                class.entries.len(),
                roster.len(),
                class.attention.len(),
                out.display()
            );
        }
        Commands::Exemplar { domain, score, k } => {
            let Some(key) = DomainKey::parse(&domain) else {
                let known: Vec<&str> = DomainKey::ALL.iter().map(|key| key.as_str()).collect();
                bail!("unknown domain '{domain}'; expected one of {}", known.join(", "));
            };
            let artifacts = load_artifacts(&artifacts_dir)?;
            let features: Vec<f64> = score.into_iter().collect();
            match artifacts.exemplars.predict(key, &features, k) {
                Some(prediction) => {
                    println!(
                        "{}: predicted severity {} ({:.1}% confidence)",
                        key.description(),
                        prediction.severity,
                        prediction.confidence * 100.0
                    );
                    for row in &prediction.rows {
                        println!("- Reason: {}", row.reason);
                        println!("  Solution: {}", row.solution);
                    }
                }
                None => println!("No exemplar model trained for {key}."),
            }
        }
    }

    Ok(())
}
