//! Per-student longitudinal aggregates.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::LOW_SCORE_THRESHOLD;
use crate::features::{FeatureGroup, GroupColumns};
use crate::models::StudentOfferingRecord;

const RECENT_WINDOW: usize = 3;
const TREND_WINDOW: usize = 2;

pub const HISTORY_COLUMNS: &[&str] = &[
    "total_subjects",
    "passed_subjects",
    "pass_rate",
    "clo_achieved_count",
    "clo_achieved_rate",
    "avg_exam_score",
    "std_exam_score",
    "min_exam_score",
    "max_exam_score",
    "avg_summary_score",
    "std_summary_score",
    "absent_exam_count",
    "absent_summary_count",
    "recent_avg_score",
    "improvement_trend",
    "recent_pass_count",
    "recent_fail_count",
    "num_with_lecturer",
    "num_in_group",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryAggregates {
    pub total_subjects: usize,
    pub passed_subjects: usize,
    pub pass_rate: f64,
    pub clo_achieved_count: usize,
    pub clo_achieved_rate: f64,
    pub avg_exam_score: f64,
    pub std_exam_score: f64,
    pub min_exam_score: f64,
    pub max_exam_score: f64,
    pub avg_summary_score: f64,
    pub std_summary_score: f64,
    pub absent_exam_count: usize,
    pub absent_summary_count: usize,
    pub recent_avg_score: f64,
    pub improvement_trend: f64,
    pub recent_pass_count: usize,
    pub recent_fail_count: usize,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Sample standard deviation; zero below two observations.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

impl HistoryAggregates {
    /// Aggregates one student's offerings; order of `records` does not matter.
    pub fn from_records(records: &[&StudentOfferingRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let mut chronological: Vec<&StudentOfferingRecord> = records.to_vec();
        chronological.sort_by_key(|r| r.term);

        let exam: Vec<f64> = chronological.iter().map(|r| r.exam_score_6).collect();
        let summary: Vec<f64> = chronological.iter().map(|r| r.summary_score).collect();
        let total = chronological.len();
        let passed = chronological.iter().filter(|r| r.passed).count();
        let achieved = chronological.iter().filter(|r| r.clo_achieved).count();

        let recent = &chronological[total.saturating_sub(RECENT_WINDOW)..];
        let recent_scores: Vec<f64> = recent.iter().map(|r| r.exam_score_6).collect();
        let recent_pass = recent.iter().filter(|r| r.passed).count();

        let improvement_trend = if total > TREND_WINDOW {
            let split = total - TREND_WINDOW;
            mean(&exam[split..]) - mean(&exam[..split])
        } else {
            0.0
        };

        Self {
            total_subjects: total,
            passed_subjects: passed,
            pass_rate: passed as f64 / total as f64,
            clo_achieved_count: achieved,
            clo_achieved_rate: achieved as f64 / total as f64,
            avg_exam_score: mean(&exam),
            std_exam_score: sample_std(&exam),
            min_exam_score: exam.iter().cloned().fold(f64::INFINITY, f64::min),
            max_exam_score: exam.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            avg_summary_score: mean(&summary),
            std_summary_score: sample_std(&summary),
            absent_exam_count: chronological.iter().filter(|r| r.absent_exam).count(),
            absent_summary_count: chronological.iter().filter(|r| r.absent_summary).count(),
            recent_avg_score: mean(&recent_scores),
            improvement_trend,
            recent_pass_count: recent_pass,
            recent_fail_count: recent.len() - recent_pass,
        }
    }

    fn values(&self, with_lecturer: usize, in_group: usize) -> Vec<f64> {
        vec![
            self.total_subjects as f64,
            self.passed_subjects as f64,
            self.pass_rate,
            self.clo_achieved_count as f64,
            self.clo_achieved_rate,
            self.avg_exam_score,
            self.std_exam_score,
            self.min_exam_score,
            self.max_exam_score,
            self.avg_summary_score,
            self.std_summary_score,
            self.absent_exam_count as f64,
            self.absent_summary_count as f64,
            self.recent_avg_score,
            self.improvement_trend,
            self.recent_pass_count as f64,
            self.recent_fail_count as f64,
            with_lecturer as f64,
            in_group as f64,
        ]
    }
}

/// Number of `(student, lecturer)` and `(student, subject)` offerings in `records`.
pub fn pair_counts(
    records: &[StudentOfferingRecord],
    student: &str,
    lecturer: &str,
    subject: &str,
) -> (usize, usize) {
    records
        .iter()
        .filter(|r| r.student_id == student)
        .fold((0, 0), |(with_lecturer, in_group), r| {
            (
                with_lecturer + usize::from(r.lecturer_name == lecturer),
                in_group + usize::from(r.subject_id == subject),
            )
        })
}

pub fn history_columns(records: &[StudentOfferingRecord]) -> GroupColumns {
    let mut by_student: BTreeMap<&str, Vec<&StudentOfferingRecord>> = BTreeMap::new();
    let mut with_lecturer: HashMap<(&str, &str), usize> = HashMap::new();
    let mut in_group: HashMap<(&str, &str), usize> = HashMap::new();
    for record in records {
        by_student.entry(&record.student_id).or_default().push(record);
        *with_lecturer
            .entry((&record.student_id, &record.lecturer_name))
            .or_insert(0) += 1;
        *in_group
            .entry((&record.student_id, &record.subject_id))
            .or_insert(0) += 1;
    }
    let aggregates: HashMap<&str, HistoryAggregates> = by_student
        .into_iter()
        .map(|(student, rows)| (student, HistoryAggregates::from_records(&rows)))
        .collect();

    let mut columns = GroupColumns::new(
        FeatureGroup::History,
        HISTORY_COLUMNS.iter().map(|c| c.to_string()).collect(),
    );
    for record in records {
        let student = record.student_id.as_str();
        let lecturer_count = with_lecturer[&(student, record.lecturer_name.as_str())];
        let group_count = in_group[&(student, record.subject_id.as_str())];
        columns.push(aggregates[student].values(lecturer_count, group_count));
    }
    columns
}

/// Summary of a student's record shown alongside a prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub total_subjects: usize,
    pub passed_subjects: usize,
    pub failed_subjects: usize,
    pub retake_count: usize,
    pub retake_rate: f64,
    pub absent_exam_count: usize,
    pub avg_score: f64,
    pub recent_avg_score: f64,
    pub pass_rate: f64,
    pub clo_achieved_rate: f64,
}

impl StudentSummary {
    pub fn from_records(records: &[&StudentOfferingRecord]) -> Self {
        let aggregates = HistoryAggregates::from_records(records);
        let mut per_subject: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *per_subject.entry(record.subject_id.as_str()).or_insert(0) += 1;
        }
        let retake_count: usize = per_subject.values().map(|n| n - 1).sum();
        let total = aggregates.total_subjects;
        Self {
            total_subjects: total,
            passed_subjects: aggregates.passed_subjects,
            failed_subjects: total - aggregates.passed_subjects,
            retake_count,
            retake_rate: if total == 0 { 0.0 } else { retake_count as f64 / total as f64 },
            absent_exam_count: aggregates.absent_exam_count,
            avg_score: aggregates.avg_exam_score,
            recent_avg_score: aggregates.recent_avg_score,
            pass_rate: aggregates.pass_rate,
            clo_achieved_rate: aggregates.clo_achieved_rate,
        }
    }

    /// Plain-language flags drawn from the student's own record.
    pub fn risk_factors(&self) -> Vec<&'static str> {
        let mut factors = Vec::new();
        if self.total_subjects == 0 {
            return factors;
        }
        if self.clo_achieved_rate < 0.5 {
            factors.push("Low CLO achievement rate");
        }
        if self.retake_rate > 0.3 {
            factors.push("High retake rate");
        }
        if self.avg_score < LOW_SCORE_THRESHOLD {
            factors.push("Low average CLO score");
        }
        if self.absent_exam_count > 0 {
            factors.push("History of missed exams");
        }
        if self.recent_avg_score < self.avg_score {
            factors.push("Recent scores trending down");
        }
        factors
    }
}
