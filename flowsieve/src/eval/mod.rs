// flowsieve/src/eval/mod.rs
//
// Evaluation of trained classifiers.
//
// Two entry points:
//   1. TrainingReport::from_outcome, after a training run. Per-family
//      accuracy and CV scores plus the winner's held-out confusion matrix
//   2. evaluate, to re-score a saved artifact against any labeled flow table
//
// Per-class precision / recall / F1 are one-vs-rest over the confusion matrix.
//
// Run:
//   flowsieve --mode train                      (report printed + saved)
//   flowsieve --mode eval --path flows.csv      (saved artifact vs. table)

pub mod report;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::InferenceError;
use crate::features::{FlowObservation, LabeledFlow};
use crate::model::{ClassLabels, HeldOut, ModelArtifact, ModelKind, ModelScore, TrainingOutcome};

// ── Per-class counters ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub tp:      u64,
    pub fp:      u64,
    pub fn_:     u64,
    pub support: u64,
}

impl ClassMetrics {
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 { 0.0 } else { self.tp as f64 / denom as f64 }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }
}

// ── Confusion matrix ──────────────────────────────────────────────────────────

/// `counts[true][predicted]`, classes in label-encoder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub classes: Vec<String>,
    pub counts:  Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn new(classes: Vec<String>) -> Self {
        let n = classes.len();
        Self { classes, counts: vec![vec![0; n]; n] }
    }

    /// Pairs with an out-of-range index are ignored.
    pub fn from_indices(classes: Vec<String>, y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut m = Self::new(classes);
        for (&t, &p) in y_true.iter().zip(y_pred) {
            m.record(t, p);
        }
        m
    }

    pub fn from_held_out(labels: &ClassLabels, held_out: &HeldOut) -> Self {
        Self::from_indices(labels.names(), &held_out.y_true, &held_out.y_pred)
    }

    pub fn record(&mut self, truth: usize, predicted: usize) {
        let n = self.classes.len();
        if truth < n && predicted < n {
            self.counts[truth][predicted] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let diag: u64 = (0..self.classes.len()).map(|i| self.counts[i][i]).sum();
        diag as f64 / total as f64
    }

    pub fn class_metrics(&self, class: usize) -> ClassMetrics {
        let n = self.classes.len();
        let tp = self.counts[class][class];
        let support: u64 = self.counts[class].iter().sum();
        let predicted: u64 = (0..n).map(|t| self.counts[t][class]).sum();
        ClassMetrics { tp, fp: predicted - tp, fn_: support - tp, support }
    }

    pub fn per_class(&self) -> Vec<(String, ClassMetrics)> {
        (0..self.classes.len()).map(|i| (self.classes[i].clone(), self.class_metrics(i))).collect()
    }

    /// Unweighted mean of per-class F1.
    pub fn macro_f1(&self) -> f64 {
        if self.classes.is_empty() {
            return 0.0;
        }
        let sum: f64 = (0..self.classes.len()).map(|i| self.class_metrics(i).f1()).sum();
        sum / self.classes.len() as f64
    }
}

// ── Training report ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub best_model: ModelKind,
    pub best_score: f64,
    pub scores:     Vec<ModelScore>,
    pub held_out:   ConfusionMatrix,
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn from_outcome(outcome: &TrainingOutcome) -> Self {
        let info = &outcome.artifact.info;
        Self {
            best_model: info.best_model,
            best_score: info.best_score,
            scores:     outcome.scores.clone(),
            held_out:   ConfusionMatrix::from_held_out(&outcome.artifact.labels, &outcome.held_out),
            trained_at: info.trained_at,
        }
    }
}

// ── Artifact evaluation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub model:     ModelKind,
    pub n_rows:    usize,
    /// Rows whose label the artifact was never trained on.
    pub n_skipped: usize,
    pub confusion: ConfusionMatrix,
}

/// Score `artifact` on a labeled table.
pub fn evaluate(artifact: &ModelArtifact, records: &[LabeledFlow]) -> Result<EvalResult, InferenceError> {
    let labels = &artifact.labels;
    let known: Vec<(&LabeledFlow, usize)> =
        records.iter().filter_map(|r| labels.encode(r.label).map(|i| (r, i))).collect();
    let n_skipped = records.len() - known.len();
    if n_skipped > 0 {
        warn!(n_skipped, "rows with labels unknown to the artifact skipped");
    }

    let observations: Vec<FlowObservation> = known.iter().map(|(r, _)| r.flow.clone()).collect();
    let predictions = artifact.predict_batch(&observations)?;

    let mut confusion = ConfusionMatrix::new(labels.names());
    for ((_, truth), pred) in known.iter().zip(&predictions) {
        if let Some(p) = labels.encode(pred.label) {
            confusion.record(*truth, p);
        }
    }

    info!(
        model    = %artifact.info.best_model,
        rows     = known.len(),
        accuracy = confusion.accuracy(),
        macro_f1 = confusion.macro_f1(),
        "artifact evaluated"
    );
    Ok(EvalResult { model: artifact.info.best_model, n_rows: known.len(), n_skipped, confusion })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> ConfusionMatrix {
        // truth A: 3 right, 1 called B; truth B: 2 right, 2 called A
        ConfusionMatrix::from_indices(
            vec!["A".into(), "B".into()],
            &[0, 0, 0, 0, 1, 1, 1, 1],
            &[0, 0, 0, 1, 1, 1, 0, 0],
        )
    }

    #[test]
    fn counts_and_accuracy() {
        let m = matrix();
        assert_eq!(m.counts, vec![vec![3, 1], vec![2, 2]]);
        assert_eq!(m.total(), 8);
        assert!((m.accuracy() - 5.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn one_vs_rest_metrics() {
        let a = matrix().class_metrics(0);
        assert_eq!(a, ClassMetrics { tp: 3, fp: 2, fn_: 1, support: 4 });
        assert!((a.precision() - 0.6).abs() < 1e-12);
        assert!((a.recall() - 0.75).abs() < 1e-12);
        assert!((a.f1() - 2.0 * 0.6 * 0.75 / 1.35).abs() < 1e-12);
    }

    #[test]
    fn empty_class_has_zero_scores() {
        let m = ConfusionMatrix::from_indices(vec!["A".into(), "B".into()], &[0, 0], &[0, 0]);
        let b = m.class_metrics(1);
        assert_eq!(b.precision(), 0.0);
        assert_eq!(b.recall(), 0.0);
        assert_eq!(b.f1(), 0.0);
        assert!((m.macro_f1() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_pairs_are_ignored() {
        let m = ConfusionMatrix::from_indices(vec!["A".into()], &[0, 3], &[0, 0]);
        assert_eq!(m.total(), 1);
    }
}
