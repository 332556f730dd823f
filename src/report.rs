use std::fmt::Write;

use crate::artifacts::ArtifactMetadata;
use crate::cohort::ClassAnalysis;
use crate::exemplar::ExemplarPrediction;
use crate::predictor::{Prediction, PredictionResult};
use crate::trainer::{EvaluationReport, TrainingReport};

fn write_exemplar(output: &mut String, exemplar: &ExemplarPrediction) {
    let _ = writeln!(
        output,
        "- {} ({}, confidence {:.0}%)",
        exemplar.domain.description(),
        exemplar.severity,
        exemplar.confidence * 100.0
    );
    for row in &exemplar.rows {
        let _ = writeln!(output, "  - Reason: {}", row.reason);
        let _ = writeln!(output, "  - Solution: {}", row.solution);
    }
}

fn write_prediction(output: &mut String, prediction: &Prediction) {
    let _ = writeln!(output, "# CLO Prediction for {}", prediction.student_id);
    let _ = writeln!(
        output,
        "Lecturer {}{} | Subject {}",
        prediction.lecturer,
        if prediction.new_lecturer { " (new)" } else { "" },
        prediction.subject
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "- Predicted score: {:.2}/6", prediction.predicted_score);
    let _ = writeln!(output, "- Pass probability: {:.1}%", prediction.prob_pass * 100.0);
    let _ = writeln!(output, "- Risk level: {}", prediction.risk_level);

    let summary = &prediction.student_summary;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Student History");
    let _ = writeln!(
        output,
        "- {} subjects, {} passed, {} failed, {} retakes",
        summary.total_subjects, summary.passed_subjects, summary.failed_subjects, summary.retake_count
    );
    let _ = writeln!(
        output,
        "- Average {:.2}/6, recent average {:.2}/6, pass rate {:.1}%",
        summary.avg_score,
        summary.recent_avg_score,
        summary.pass_rate * 100.0
    );
    for factor in &prediction.risk_factors {
        let _ = writeln!(output, "- Risk factor: {factor}");
    }

    if let Some(profile) = &prediction.profile {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Assessment Methods");
        let _ = writeln!(
            output,
            "- In use: {} ({} formative, {} summative)",
            profile.used.join(", "),
            profile.formative,
            profile.summative
        );
        let _ = writeln!(output, "- Diversity {:.1}/10, effectiveness {}", profile.diversity, profile.effectiveness);
        let _ = writeln!(
            output,
            "- Compatibility {:.1}/10 ({})",
            profile.compatibility.score, profile.compatibility.level
        );
        for strength in &profile.strengths {
            let _ = writeln!(output, "- Strength: {strength}");
        }
        for weakness in &profile.weaknesses {
            let _ = writeln!(output, "- Weakness: {weakness}");
        }
        for improvement in &profile.teaching_improvements {
            let _ = writeln!(output, "- [{}] {}", improvement.priority(), improvement.short_label());
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Reasons");
    if prediction.reasons.is_empty() {
        let _ = writeln!(output, "No low-score factors found.");
    } else {
        for reason in &prediction.reasons {
            let _ = writeln!(output, "- [{}] {}: {}", reason.severity, reason.reason, reason.detail);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    if prediction.recommendations.is_empty() {
        let _ = writeln!(output, "No recommendations.");
    } else {
        for rec in &prediction.recommendations {
            let _ = writeln!(output, "- [{}] {} ({})", rec.priority, rec.title, rec.category);
            let _ = writeln!(output, "  - {}", rec.detail);
            let _ = writeln!(output, "  - {}", rec.suggestion);
        }
    }

    if !prediction.exemplars.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Reference Cases");
        for exemplar in &prediction.exemplars {
            write_exemplar(output, exemplar);
        }
    }
}

pub fn render_prediction(result: &PredictionResult) -> String {
    let mut output = String::new();
    match result {
        PredictionResult::Scored(prediction) => write_prediction(&mut output, prediction),
        PredictionResult::Failed { message } => {
            let _ = writeln!(output, "# CLO Prediction");
            let _ = writeln!(output, "Prediction failed: {message}");
        }
    }
    output
}

pub fn render_class(class: &ClassAnalysis) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Class Report: {} / {}", class.subject, class.lecturer);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    match &class.stats {
        Some(stats) => {
            let _ = writeln!(output, "- Students scored: {}", stats.count);
            let _ = writeln!(
                output,
                "- Mean {:.2}, median {:.2}, std {:.2}, range {:.2}-{:.2}",
                stats.mean, stats.median, stats.std, stats.min, stats.max
            );
            let _ = writeln!(output, "- Pass rate: {:.1}%", class.pass_rate * 100.0);
            let _ = writeln!(output, "- Excellent rate: {:.1}%", class.excellent_rate * 100.0);
        }
        None => {
            let _ = writeln!(output, "No students could be scored.");
        }
    }

    if !class.distribution.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Performance Distribution");
        for (level, count) in &class.distribution {
            let _ = writeln!(output, "- {level}: {count}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");
    if class.attention.is_empty() {
        let _ = writeln!(output, "No students below the attention threshold.");
    } else {
        for entry in &class.attention {
            let _ = writeln!(
                output,
                "- {} score {:.2} ({} risk){}",
                entry.student_id,
                entry.predicted_score,
                entry.risk_level,
                entry
                    .top_reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            );
        }
    }

    if !class.common_reasons.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Common Reasons");
        for (reason, count) in class.common_reasons.iter().take(5) {
            let _ = writeln!(output, "- {reason} ({count} students)");
        }
    }

    if let Some(exemplar) = &class.exemplar {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Class-Level Recommendation");
        write_exemplar(&mut output, exemplar);
    }

    if !class.failed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Not Scored");
        for (student, message) in &class.failed {
            let _ = writeln!(output, "- {student}: {message}");
        }
    }
    output
}

pub fn render_training(report: &TrainingReport, metadata: &ArtifactMetadata) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Training Summary");
    let _ = writeln!(output, "Run {} at {}", metadata.run_id, metadata.trained_at.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "- {} records from {} tables, {} features",
        metadata.total_records, metadata.dataset_count, metadata.feature_count
    );
    let _ = writeln!(output, "- Train/test: {}/{}", report.train_size, report.test_size);
    let _ = writeln!(output, "- Logistic regression: {:.4}", report.linear_accuracy);
    let _ = writeln!(output, "- Random forest: {:.4}", report.forest_accuracy);
    let _ = writeln!(output, "- Gradient boosting: {:.4}", report.boosting_accuracy);
    let _ = writeln!(output, "- Voting ensemble: {:.4}", report.ensemble_accuracy);
    let _ = writeln!(output, "- Cross-validation: {:.4} (+/- {:.4})", report.cv_mean, report.cv_std * 2.0);

    if !report.top_importances.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Top Features");
        for (name, importance) in &report.top_importances {
            let _ = writeln!(output, "- {name}: {importance:.4}");
        }
    }

    if !metadata.exemplar_models.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Exemplar Models");
        for summary in &metadata.exemplar_models {
            let _ = writeln!(
                output,
                "- {}: {} accuracy {:.4} over {} rows",
                summary.domain, summary.model_type, summary.accuracy, summary.corpus_size
            );
            if !summary.problem_types.is_empty() {
                let _ = writeln!(output, "  - Problem types: {}", summary.problem_types.join(", "));
            }
        }
    }
    output
}

pub fn render_evaluation(evaluation: &EvaluationReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Held-out Evaluation");
    let _ = writeln!(output, "Accuracy: {:.4}", evaluation.accuracy);
    let _ = writeln!(output);
    let _ = writeln!(output, "| Class | Precision | Recall | F1 | Support |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for class in &evaluation.report.classes {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {:.2} | {:.2} | {} |",
            class.label, class.precision, class.recall, class.f1, class.support
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "```");
    let _ = write!(output, "{}", evaluation.confusion);
    let _ = writeln!(output, "```");
    output
}
