// flowsieve/src/model/scaler.rs

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Per-column standardization `(x - mean) / std`. Constant columns get a
/// scale of 1 so they map to zero instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean:  Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean: Array1<f64> = x.sum_axis(Axis(0)) / n;
        let scale = x
            .columns()
            .into_iter()
            .zip(mean.iter())
            .map(|(col, m)| {
                let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > f64::EPSILON { std } else { 1.0 }
            })
            .collect();
        Self { mean: mean.to_vec(), scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        if x.ncols() != self.n_features() {
            return Err(InferenceError::FeatureMismatch { expected: self.n_features(), got: x.ncols() });
        }
        let mut out = x.to_owned();
        for (j, mut col) in out.columns_mut().into_iter().enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            col.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardizes_and_handles_constant_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let s = StandardScaler::fit(&x);
        let t = s.transform(&x).unwrap();
        assert_eq!(t, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn rejects_wrong_width() {
        let s = StandardScaler::fit(&array![[1.0, 2.0]]);
        assert!(matches!(
            s.transform(&array![[1.0, 2.0, 3.0]]),
            Err(InferenceError::FeatureMismatch { expected: 2, got: 3 })
        ));
    }
}
