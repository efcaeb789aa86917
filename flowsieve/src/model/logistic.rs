// flowsieve/src/model/logistic.rs
//
// Multinomial logistic regression (L-BFGS via linfa).
//
// linfa sums the loss over rows, so the L2 penalty and the gradient tolerance
// are scaled by the row count. Inputs are clipped to ±INPUT_CLIP standard
// deviations on both fit and predict; heavy-tailed volume columns otherwise
// push the line search into non-descent steps. If a fit still fails, it is
// retried with a stronger penalty before giving up.

use linfa::prelude::*;
use linfa_logistic::{MultiFittedLogisticRegression, MultiLogisticRegression};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Classifier;
use crate::error::InferenceError;

const MAX_ITERATIONS: u64 = 200;
const INPUT_CLIP:     f64 = 8.0;
/// Gradient tolerance per training row.
const TOL_PER_ROW:    f64 = 1e-4;
/// L2 penalty per training row, one entry per attempt.
const ALPHA_LADDER:   [f64; 3] = [1e-3, 1e-2, 1e-1];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logistic {
    n_classes: usize,
    model:     MultiFittedLogisticRegression<f64, usize>,
}

impl Logistic {
    pub fn fit(x: &Array2<f64>, y: &Array1<usize>, n_classes: usize) -> Result<Self, String> {
        let rows = x.nrows().max(1) as f64;
        let dataset = DatasetBase::new(clip(x), y.clone());

        let mut last_error = String::from("no attempt made");
        for (attempt, alpha) in ALPHA_LADDER.iter().enumerate() {
            let fitted = MultiLogisticRegression::<f64>::default()
                .alpha(alpha * rows)
                .gradient_tolerance(TOL_PER_ROW * rows)
                .max_iterations(MAX_ITERATIONS)
                .fit(&dataset);
            match fitted {
                Ok(model) => return Ok(Self { n_classes, model }),
                Err(e) => {
                    debug!(attempt, alpha, error = %e, "logistic fit failed, raising penalty");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }
}

fn clip(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.clamp(-INPUT_CLIP, INPUT_CLIP))
}

impl Classifier for Logistic {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// linfa orders probability columns by the classes seen during fitting;
    /// they are scattered back to class-index columns here.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        let raw = self.model.predict_probabilities(&clip(x));
        let seen = self.model.classes();
        if raw.ncols() != seen.len() {
            return Err(InferenceError::Scoring(format!(
                "logistic model returned {} columns for {} classes",
                raw.ncols(),
                seen.len()
            )));
        }
        let mut out = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for (j, &class) in seen.iter().enumerate() {
            if class >= self.n_classes {
                return Err(InferenceError::UnknownClass(class));
            }
            out.column_mut(class).assign(&raw.column(j));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil;

    #[test]
    fn clipping_bounds_outliers() {
        let x = ndarray::array![[100.0, -0.5], [-1e9, 3.0]];
        let c = clip(&x);
        assert_eq!(c, ndarray::array![[INPUT_CLIP, -0.5], [-INPUT_CLIP, 3.0]]);
    }

    #[test]
    fn fits_with_extreme_rows() {
        let (mut x, y) = testutil::blobs(200, 9);
        x[[0, 0]] = 1e6;
        x[[1, 1]] = -1e6;
        let m = Logistic::fit(&x, &y, 3).unwrap();
        let acc = testutil::accuracy(&m.predict(&x).unwrap(), &y);
        assert!(acc > 0.9, "accuracy {acc}");
    }
}
