// flowsieve/src/model/trainer.rs
//
// Offline training run.
//
//   records ─► FeatureEngineer::fit ─► X, y
//           ─► stratified split (train / held-out, fixed seed)
//           ─► StandardScaler fitted on the train split only
//           ─► every roster family: fit, held-out accuracy, k-fold CV on train
//           ─► best family by CV mean accuracy (first wins ties)
//
// Selection deliberately uses the cross-validation mean on the training split,
// not held-out accuracy. Held-out accuracy is reported alongside it.

use std::path::Path;

use chrono::Utc;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::artifact::{ModelArtifact, ModelInfo};
use super::{Classifier, ClassLabels, ModelKind, StandardScaler, TrainedModel};
use crate::config::TrainingSettings;
use crate::error::TrainingError;
use crate::events::TrainingRecord;
use crate::features::{feature_names, FeatureEngineer, FlowObservation, LabeledFlow};

/// Scores of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model:    ModelKind,
    pub accuracy: f64,
    pub cv_mean:  f64,
    pub cv_std:   f64,
}

/// One fitted family with its scores.
pub struct TrainedEntry {
    pub model: TrainedModel,
    pub score: ModelScore,
}

/// Every family fitted in one run, in roster order.
pub struct TrainedRoster {
    pub entries: Vec<TrainedEntry>,
}

impl TrainedRoster {
    /// Highest CV mean; the earlier family wins a tie.
    pub fn best(&self) -> Option<&TrainedEntry> {
        self.best_index().map(|i| &self.entries[i])
    }

    pub fn into_best(mut self) -> Option<TrainedEntry> {
        let i = self.best_index()?;
        Some(self.entries.swap_remove(i))
    }

    fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, e) in self.entries.iter().enumerate() {
            if best.map_or(true, |b| e.score.cv_mean > self.entries[b].score.cv_mean) {
                best = Some(i);
            }
        }
        best
    }

    pub fn scores(&self) -> Vec<ModelScore> {
        self.entries.iter().map(|e| e.score.clone()).collect()
    }
}

/// Held-out predictions of the selected model, as class indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeldOut {
    pub y_true: Vec<usize>,
    pub y_pred: Vec<usize>,
}

pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub scores:   Vec<ModelScore>,
    pub held_out: HeldOut,
}

pub struct ModelTrainer {
    settings: TrainingSettings,
    roster:   Vec<ModelKind>,
}

impl ModelTrainer {
    pub fn new(settings: TrainingSettings) -> Self {
        Self { settings, roster: ModelKind::roster() }
    }

    /// Restrict the roster, e.g. to keep test runs short.
    pub fn with_roster(mut self, roster: Vec<ModelKind>) -> Self {
        self.roster = roster;
        self
    }

    /// Train, then atomically replace the artifact in `model_dir`.
    pub fn train_and_save(&self, rows: &[LabeledFlow], model_dir: &Path) -> Result<TrainingOutcome, TrainingError> {
        let outcome = self.train_flows(rows)?;
        outcome.artifact.save(model_dir)?;
        info!(dir = %model_dir.display(), "artifact saved");
        Ok(outcome)
    }

    /// Train on fully populated records, e.g. from the synthetic generator.
    pub fn train(&self, records: &[TrainingRecord]) -> Result<TrainingOutcome, TrainingError> {
        let rows: Vec<LabeledFlow> = records.iter().map(LabeledFlow::from).collect();
        self.train_flows(&rows)
    }

    /// Train on rows whose feature columns may be absent; gaps are imputed
    /// with the training medians.
    pub fn train_flows(&self, rows: &[LabeledFlow]) -> Result<TrainingOutcome, TrainingError> {
        if rows.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        #[cfg(not(feature = "boosted-trees"))]
        info!("HistGradientBoosting not compiled in (feature \"boosted-trees\"), skipping");

        let labels = ClassLabels::fit(rows.iter().map(|r| r.label));
        if labels.len() < 2 {
            return Err(TrainingError::SingleClass(labels.names().join(",")));
        }

        let observations: Vec<FlowObservation> = rows.iter().map(|r| r.flow.clone()).collect();
        let features = FeatureEngineer::fit(&observations);
        let x = features.transform_batch(&observations);
        let y: Array1<usize> = rows
            .iter()
            .map(|r| labels.encode(r.label).ok_or_else(|| TrainingError::SingleClass(r.label.to_string())))
            .collect::<Result<_, _>>()?;
        info!(rows = x.nrows(), features = x.ncols(), classes = ?labels.names(), "feature matrix built");

        let (train_idx, test_idx) = stratified_split(&y, &labels.names(), self.settings.test_fraction, self.settings.seed)?;
        let x_train_raw = x.select(Axis(0), &train_idx);
        let scaler = StandardScaler::fit(&x_train_raw);
        let x_train = scale(&scaler, &x_train_raw)?;
        let x_test = scale(&scaler, &x.select(Axis(0), &test_idx))?;
        let y_train = y.select(Axis(0), &train_idx);
        let y_test = y.select(Axis(0), &test_idx);

        let roster = self.train_models(&x_train, &y_train, &x_test, &y_test, labels.len())?;
        let scores = roster.scores();
        let best = roster.into_best().ok_or(TrainingError::EmptyDataset)?;
        info!(model = %best.score.model, cv_mean = best.score.cv_mean, "best model selected");

        let y_pred = predict_indices(&best.model, best.score.model, &x_test)?;
        let held_out = HeldOut { y_true: y_test.to_vec(), y_pred };

        let info = ModelInfo {
            best_model:    best.score.model,
            best_score:    best.score.cv_mean,
            feature_names: feature_names(),
            classes:       labels.names(),
            trained_at:    Utc::now(),
            digests:       Default::default(),
        };

        Ok(TrainingOutcome {
            artifact: ModelArtifact { model: best.model, features, scaler, labels, info },
            scores,
            held_out,
        })
    }

    /// Fit every roster family on the (already scaled) train split and score it.
    /// A family that fails to fit is logged and left out of the comparison;
    /// the run fails only when no family fits.
    pub fn train_models(
        &self,
        x_train:   &Array2<f64>,
        y_train:   &Array1<usize>,
        x_test:    &Array2<f64>,
        y_test:    &Array1<usize>,
        n_classes: usize,
    ) -> Result<TrainedRoster, TrainingError> {
        let folds = stratified_folds(y_train, n_classes, self.settings.cv_folds.max(2), self.settings.seed);

        let mut entries = Vec::with_capacity(self.roster.len());
        let mut failures = Vec::new();
        for &kind in &self.roster {
            match self.train_family(kind, x_train, y_train, x_test, y_test, n_classes, &folds) {
                Ok(entry) => {
                    let s = &entry.score;
                    info!(model = %kind, accuracy = s.accuracy, cv_mean = s.cv_mean, cv_std = s.cv_std, "model trained");
                    entries.push(entry);
                }
                Err(e) => {
                    warn!(model = %kind, error = %e, "model failed to fit, left out of selection");
                    failures.push(e.to_string());
                }
            }
        }
        if entries.is_empty() {
            return Err(TrainingError::NoModelFitted(failures));
        }
        Ok(TrainedRoster { entries })
    }

    /// Main fit, held-out accuracy and k-fold CV of one family. Any failing
    /// fold fails the family.
    #[allow(clippy::too_many_arguments)]
    fn train_family(
        &self,
        kind:      ModelKind,
        x_train:   &Array2<f64>,
        y_train:   &Array1<usize>,
        x_test:    &Array2<f64>,
        y_test:    &Array1<usize>,
        n_classes: usize,
        folds:     &[(Vec<usize>, Vec<usize>)],
    ) -> Result<TrainedEntry, TrainingError> {
        let seed = self.settings.seed;
        let model = kind.fit(x_train, y_train, n_classes, seed)?;
        let accuracy = accuracy_of(&predict_indices(&model, kind, x_test)?, &y_test.to_vec());

        let mut cv = Vec::with_capacity(folds.len());
        for (f, (fit_idx, val_idx)) in folds.iter().enumerate() {
            let fold_model = kind.fit(
                &x_train.select(Axis(0), fit_idx),
                &y_train.select(Axis(0), fit_idx),
                n_classes,
                seed.wrapping_add(f as u64 + 1),
            )?;
            let val_true = y_train.select(Axis(0), val_idx).to_vec();
            let val_pred = predict_indices(&fold_model, kind, &x_train.select(Axis(0), val_idx))?;
            cv.push(accuracy_of(&val_pred, &val_true));
        }
        let (cv_mean, cv_std) = mean_std(&cv);
        Ok(TrainedEntry { model, score: ModelScore { model: kind, accuracy, cv_mean, cv_std } })
    }
}

fn scale(scaler: &StandardScaler, x: &Array2<f64>) -> Result<Array2<f64>, TrainingError> {
    scaler.transform(x).map_err(|e| TrainingError::Fit { model: "StandardScaler".into(), reason: e.to_string() })
}

fn predict_indices(model: &TrainedModel, kind: ModelKind, x: &Array2<f64>) -> Result<Vec<usize>, TrainingError> {
    model
        .predict(x)
        .map(|p| p.to_vec())
        .map_err(|e| TrainingError::Fit { model: kind.name().to_string(), reason: e.to_string() })
}

fn accuracy_of(pred: &[usize], truth: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    pred.iter().zip(truth).filter(|(a, b)| a == b).count() as f64 / truth.len() as f64
}

/// Population mean and standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn indices_by_class(y: &Array1<usize>, n_classes: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut by_class = vec![Vec::new(); n_classes];
    for (i, &c) in y.iter().enumerate() {
        by_class[c].push(i);
    }
    for idx in &mut by_class {
        idx.shuffle(rng);
    }
    by_class
}

/// Per-class shuffled split; every class contributes at least one row to each
/// side.
fn stratified_split(
    y: &Array1<usize>,
    classes: &[String],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), TrainingError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (class, idx) in indices_by_class(y, classes.len(), &mut rng).into_iter().enumerate() {
        if idx.len() < 2 {
            let label = classes.get(class).cloned().unwrap_or_else(|| class.to_string());
            return Err(TrainingError::TooFewRows { label, count: idx.len(), needed: 2 });
        }
        let n_test = ((idx.len() as f64 * test_fraction).round() as usize).clamp(1, idx.len() - 1);
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok((train, test))
}

/// Stratified k-fold: rows of each class are dealt round-robin to folds.
/// Returns (fit, validate) index pairs.
fn stratified_folds(y: &Array1<usize>, n_classes: usize, k: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let mut fold_of = vec![0usize; y.len()];
    for idx in indices_by_class(y, n_classes, &mut rng) {
        for (j, &i) in idx.iter().enumerate() {
            fold_of[i] = j % k;
        }
    }
    (0..k)
        .map(|f| {
            let (val, fit): (Vec<usize>, Vec<usize>) = (0..y.len()).partition(|&i| fold_of[i] == f);
            (fit, val)
        })
        .filter(|(fit, val)| !fit.is_empty() && !val.is_empty())
        .collect()
}
