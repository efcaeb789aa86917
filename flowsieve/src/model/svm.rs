// flowsieve/src/model/svm.rs
//
// One-vs-rest linear SVM trained with Pegasos-style SGD on the hinge loss.
// Probabilities are a softmax over the per-class margins.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::{softmax_rows, Classifier};
use crate::error::InferenceError;

#[derive(Debug, Clone)]
pub struct SvmParams {
    pub lambda: f64,
    pub epochs: usize,
    /// Offset of the step schedule `1 / (lambda * (t0 + t))`.
    pub t0:     f64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self { lambda: 1e-4, epochs: 15, t0: 1e4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    /// (n_classes × n_features)
    weights: Array2<f64>,
    bias:    Array1<f64>,
}

impl LinearSvm {
    pub fn fit(x: &Array2<f64>, y: &Array1<usize>, n_classes: usize, p: &SvmParams, seed: u64) -> Self {
        let (n, d) = x.dim();
        let mut weights = Array2::<f64>::zeros((n_classes, d));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let mut order: Vec<usize> = (0..n).collect();

        for k in 0..n_classes {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
            let mut w = Array1::<f64>::zeros(d);
            let mut b = 0.0;
            let mut t = 0.0;
            for _ in 0..p.epochs {
                order.shuffle(&mut rng);
                for &i in &order {
                    let eta = 1.0 / (p.lambda * (p.t0 + t));
                    let yi = if y[i] == k { 1.0 } else { -1.0 };
                    let margin = yi * (x.row(i).dot(&w) + b);
                    w *= 1.0 - eta * p.lambda;
                    if margin < 1.0 {
                        w.scaled_add(eta * yi, &x.row(i));
                        b += eta * yi;
                    }
                    t += 1.0;
                }
            }
            weights.row_mut(k).assign(&w);
            bias[k] = b;
        }
        Self { weights, bias }
    }

    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        if x.ncols() != self.weights.ncols() {
            return Err(InferenceError::FeatureMismatch { expected: self.weights.ncols(), got: x.ncols() });
        }
        Ok(x.dot(&self.weights.t()) + &self.bias)
    }
}

impl Classifier for LinearSvm {
    fn n_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        let mut scores = self.decision_function(x)?;
        softmax_rows(&mut scores);
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::blobs;

    #[test]
    fn margins_separate_blobs() {
        let (x, y) = blobs(30, 4);
        let svm = LinearSvm::fit(&x, &y, 3, &SvmParams::default(), 0);
        let margins = svm.decision_function(&x).unwrap();
        let correct = (0..x.nrows())
            .filter(|&i| crate::model::argmax(margins.row(i).iter().copied()) == y[i])
            .count();
        assert!(correct as f64 / x.nrows() as f64 > 0.9);
    }
}
