// flowsieve/src/model/mod.rs
//
// Classifier families, preprocessing state and the persisted artifact.
//
// Every family fits on a standardized (n_rows × n_features) matrix with class
// indices 0..n_classes and answers with a (n_rows × n_classes) probability
// matrix. The roster is fixed:
//
//   RandomForest          bagged linfa decision trees, vote share
//   GradientBoosting      softmax boosting over shallow histogram trees
//   LogisticRegression    linfa multinomial logistic regression
//   Svm                   one-vs-rest linear SVM, softmax over margins
//   NeuralNetwork         one hidden ReLU layer, softmax output
//   HistGradientBoosting  deeper, subsampled boosting (feature "boosted-trees")

pub mod artifact;
pub mod boosting;
pub mod forest;
pub mod labels;
pub mod logistic;
pub mod mlp;
pub mod scaler;
pub mod svm;
pub mod trainer;
mod tree;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, TrainingError};

pub use artifact::{ModelArtifact, ModelInfo, Prediction};
pub use labels::ClassLabels;
pub use scaler::StandardScaler;
pub use trainer::{HeldOut, ModelScore, ModelTrainer, TrainingOutcome};

/// Common inference surface of every fitted family.
pub trait Classifier {
    fn n_classes(&self) -> usize;

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError>;

    /// Arg-max class per row.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>, InferenceError> {
        let proba = self.predict_proba(x)?;
        Ok(proba.map_axis(Axis(1), |row| argmax(row.iter().copied())))
    }
}

pub(crate) fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Row-wise softmax, numerically stabilized by the row max.
pub(crate) fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}

// ── Roster ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    RandomForest,
    GradientBoosting,
    LogisticRegression,
    #[serde(rename = "SVM")]
    Svm,
    NeuralNetwork,
    HistGradientBoosting,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::RandomForest         => "RandomForest",
            Self::GradientBoosting     => "GradientBoosting",
            Self::LogisticRegression   => "LogisticRegression",
            Self::Svm                  => "SVM",
            Self::NeuralNetwork        => "NeuralNetwork",
            Self::HistGradientBoosting => "HistGradientBoosting",
        }
    }

    /// Families compiled into this build, in training order. The optional
    /// boosted-tree family is absent without the `boosted-trees` feature.
    pub fn roster() -> Vec<ModelKind> {
        #[allow(unused_mut)]
        let mut kinds = vec![
            Self::RandomForest,
            Self::GradientBoosting,
            Self::LogisticRegression,
            Self::Svm,
            Self::NeuralNetwork,
        ];
        #[cfg(feature = "boosted-trees")]
        kinds.push(Self::HistGradientBoosting);
        kinds
    }

    pub fn fit(
        self,
        x: &Array2<f64>,
        y: &Array1<usize>,
        n_classes: usize,
        seed: u64,
    ) -> Result<TrainedModel, TrainingError> {
        let model = match self {
            Self::RandomForest => TrainedModel::Forest(
                forest::RandomForest::fit(x, y, n_classes, &forest::ForestParams::default(), seed)
                    .map_err(|reason| self.fit_error(reason))?,
            ),
            Self::GradientBoosting => TrainedModel::Boosted(boosting::BoostedTrees::fit(
                x, y, n_classes, &boosting::BoostingParams::standard(), seed,
            )),
            Self::HistGradientBoosting => TrainedModel::Boosted(boosting::BoostedTrees::fit(
                x, y, n_classes, &boosting::BoostingParams::histogram(), seed,
            )),
            Self::LogisticRegression => TrainedModel::Logistic(
                logistic::Logistic::fit(x, y, n_classes).map_err(|reason| self.fit_error(reason))?,
            ),
            Self::Svm => TrainedModel::Svm(svm::LinearSvm::fit(x, y, n_classes, &svm::SvmParams::default(), seed)),
            Self::NeuralNetwork => TrainedModel::Mlp(mlp::Mlp::fit(x, y, n_classes, &mlp::MlpParams::default(), seed)),
        };
        Ok(model)
    }

    fn fit_error(self, reason: String) -> TrainingError {
        TrainingError::Fit { model: self.name().to_string(), reason }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Fitted model ──────────────────────────────────────────────────────────────

/// A fitted model of any family, serializable as the artifact's model blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum TrainedModel {
    Forest(forest::RandomForest),
    Boosted(boosting::BoostedTrees),
    Logistic(logistic::Logistic),
    Svm(svm::LinearSvm),
    Mlp(mlp::Mlp),
}

impl TrainedModel {
    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::Forest(m)   => m,
            Self::Boosted(m)  => m,
            Self::Logistic(m) => m,
            Self::Svm(m)      => m,
            Self::Mlp(m)      => m,
        }
    }
}

impl Classifier for TrainedModel {
    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        let proba = self.inner().predict_proba(x)?;
        if proba.ncols() != self.n_classes() || proba.nrows() != x.nrows() {
            return Err(InferenceError::Scoring(format!(
                "probability matrix is {}x{}, expected {}x{}",
                proba.nrows(), proba.ncols(), x.nrows(), self.n_classes()
            )));
        }
        if proba.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::Scoring("non-finite probability".into()));
        }
        Ok(proba)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_rows_normalize() {
        let mut s = array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]];
        softmax_rows(&mut s);
        for row in s.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((s[[1, 0]] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(argmax(s.row(0).iter().copied()), 2);
    }

    #[test]
    fn roster_has_core_families() {
        let roster = ModelKind::roster();
        assert_eq!(&roster[..5], &[
            ModelKind::RandomForest,
            ModelKind::GradientBoosting,
            ModelKind::LogisticRegression,
            ModelKind::Svm,
            ModelKind::NeuralNetwork,
        ]);
        assert_eq!(roster.contains(&ModelKind::HistGradientBoosting), cfg!(feature = "boosted-trees"));
    }

    #[test]
    fn every_family_learns_blobs() {
        let (x, y) = testutil::blobs(40, 3);
        for kind in [
            ModelKind::RandomForest,
            ModelKind::GradientBoosting,
            ModelKind::HistGradientBoosting,
            ModelKind::LogisticRegression,
            ModelKind::Svm,
            ModelKind::NeuralNetwork,
        ] {
            let model = kind.fit(&x, &y, 3, 11).unwrap();
            assert_eq!(model.n_classes(), 3);
            let proba = model.predict_proba(&x).unwrap();
            for row in proba.rows() {
                assert!((row.sum() - 1.0).abs() < 1e-6, "{kind}");
            }
            let acc = testutil::accuracy(&model.predict(&x).unwrap(), &y);
            assert!(acc > 0.9, "{kind} accuracy {acc}");
        }
    }
}
