// flowsieve/src/model/mlp.rs
//
// Feed-forward network: input → ReLU hidden layer → softmax output, trained
// with mini-batch SGD on cross-entropy.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{softmax_rows, Classifier};
use crate::error::InferenceError;

#[derive(Debug, Clone)]
pub struct MlpParams {
    pub hidden:        usize,
    pub epochs:        usize,
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub l2:            f64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self { hidden: 64, epochs: 60, batch_size: 32, learning_rate: 0.05, l2: 1e-4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

impl Mlp {
    pub fn fit(x: &Array2<f64>, y: &Array1<usize>, n_classes: usize, p: &MlpParams, seed: u64) -> Self {
        let (n, d) = x.dim();
        let mut rng = StdRng::seed_from_u64(seed);

        // He-uniform for the ReLU layer, Glorot-uniform for the output layer.
        let a1 = (6.0 / d.max(1) as f64).sqrt();
        let a2 = (6.0 / (p.hidden + n_classes) as f64).sqrt();
        let mut net = Self {
            w1: Array2::from_shape_fn((d, p.hidden), |_| rng.gen_range(-a1..a1)),
            b1: Array1::zeros(p.hidden),
            w2: Array2::from_shape_fn((p.hidden, n_classes), |_| rng.gen_range(-a2..a2)),
            b2: Array1::zeros(n_classes),
        };

        let mut order: Vec<usize> = (0..n).collect();
        for _ in 0..p.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(p.batch_size.max(1)) {
                net.step(x, y, batch, p);
            }
        }
        net
    }

    fn forward(&self, x: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let hidden = (x.dot(&self.w1) + &self.b1).mapv(|v| v.max(0.0));
        let mut out = hidden.dot(&self.w2) + &self.b2;
        softmax_rows(&mut out);
        (hidden, out)
    }

    fn step(&mut self, x: &Array2<f64>, y: &Array1<usize>, batch: &[usize], p: &MlpParams) {
        let xb = x.select(Axis(0), batch);
        let (hidden, mut delta) = self.forward(&xb);
        for (r, &i) in batch.iter().enumerate() {
            delta[[r, y[i]]] -= 1.0;
        }
        let m = batch.len() as f64;
        delta /= m;

        let gw2 = hidden.t().dot(&delta) + &(&self.w2 * p.l2);
        let gb2 = delta.sum_axis(Axis(0));
        let mut dh = delta.dot(&self.w2.t());
        dh.zip_mut_with(&hidden, |g, &h| if h <= 0.0 { *g = 0.0 });
        let gw1 = xb.t().dot(&dh) + &(&self.w1 * p.l2);
        let gb1 = dh.sum_axis(Axis(0));

        self.w2.scaled_add(-p.learning_rate, &gw2);
        self.b2.scaled_add(-p.learning_rate, &gb2);
        self.w1.scaled_add(-p.learning_rate, &gw1);
        self.b1.scaled_add(-p.learning_rate, &gb1);
    }
}

impl Classifier for Mlp {
    fn n_classes(&self) -> usize {
        self.w2.ncols()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        if x.ncols() != self.w1.nrows() {
            return Err(InferenceError::FeatureMismatch { expected: self.w1.nrows(), got: x.ncols() });
        }
        Ok(self.forward(x).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::{accuracy, blobs};

    #[test]
    fn same_seed_same_weights() {
        let (x, y) = blobs(15, 8);
        let p = MlpParams { epochs: 5, ..Default::default() };
        let a = Mlp::fit(&x, &y, 3, &p, 3);
        let b = Mlp::fit(&x, &y, 3, &p, 3);
        assert_eq!(a.w1, b.w1);
        assert_eq!(a.w2, b.w2);
    }

    #[test]
    fn learns_blobs() {
        let (x, y) = blobs(30, 8);
        let m = Mlp::fit(&x, &y, 3, &MlpParams::default(), 1);
        assert!(accuracy(&m.predict(&x).unwrap(), &y) > 0.9);
    }
}
