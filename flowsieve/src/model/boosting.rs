// flowsieve/src/model/boosting.rs
//
// Multi-class gradient boosting with softmax loss. Each round fits one
// regression tree per class to the gradient `p_k - y_k` with hessian
// `p_k (1 - p_k)`; raw scores start at the log class prior.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{Binner, RegressionTree, TreeParams};
use super::{softmax_rows, Classifier};
use crate::error::InferenceError;

#[derive(Debug, Clone)]
pub struct BoostingParams {
    pub n_estimators:  usize,
    pub learning_rate: f64,
    pub max_depth:     usize,
    pub max_bins:      usize,
    pub min_leaf:      usize,
    pub lambda:        f64,
    /// Fraction of rows drawn (without replacement) for each round.
    pub subsample:     f64,
}

impl BoostingParams {
    /// Shallow trees on every row.
    pub fn standard() -> Self {
        Self {
            n_estimators:  50,
            learning_rate: 0.1,
            max_depth:     3,
            max_bins:      64,
            min_leaf:      5,
            lambda:        1.0,
            subsample:     1.0,
        }
    }

    /// Deeper trees over finer histograms with row subsampling.
    pub fn histogram() -> Self {
        Self {
            n_estimators:  60,
            learning_rate: 0.1,
            max_depth:     6,
            max_bins:      128,
            min_leaf:      20,
            lambda:        1.0,
            subsample:     0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTrees {
    n_classes: usize,
    init:      Vec<f64>,
    /// `rounds[r][k]` is the tree for class `k` in round `r`.
    rounds:    Vec<Vec<RegressionTree>>,
}

impl BoostedTrees {
    pub fn fit(x: &Array2<f64>, y: &Array1<usize>, n_classes: usize, p: &BoostingParams, seed: u64) -> Self {
        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut counts = vec![0usize; n_classes];
        for &c in y {
            counts[c] += 1;
        }
        let init: Vec<f64> = counts
            .iter()
            .map(|&c| (c.max(1) as f64 / n.max(1) as f64).ln())
            .collect();

        let binner = Binner::fit(x, p.max_bins);
        let bins = binner.transform(x);
        let tree_params = TreeParams { max_depth: p.max_depth, min_leaf: p.min_leaf, lambda: p.lambda };
        let scale = p.learning_rate * (n_classes.saturating_sub(1)) as f64 / n_classes.max(1) as f64;
        let n_sub = ((n as f64 * p.subsample).round() as usize).clamp(1.min(n), n);

        let mut raw = Array2::from_shape_fn((n, n_classes), |(_, k)| init[k]);
        let mut rounds = Vec::with_capacity(p.n_estimators);
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for round in 0..p.n_estimators {
            let mut proba = raw.clone();
            softmax_rows(&mut proba);

            let rows: Vec<usize> = if n_sub < n {
                sample(&mut rng, n, n_sub).into_vec()
            } else {
                (0..n).collect()
            };

            let mut trees = Vec::with_capacity(n_classes);
            for k in 0..n_classes {
                for i in 0..n {
                    let pk = proba[[i, k]];
                    let yk = if y[i] == k { 1.0 } else { 0.0 };
                    grad[i] = pk - yk;
                    hess[i] = (pk * (1.0 - pk)).max(1e-16);
                }
                let tree = RegressionTree::fit(&binner, &bins, &grad, &hess, rows.clone(), tree_params, scale);
                for i in 0..n {
                    raw[[i, k]] += tree.predict_row(x.row(i));
                }
                trees.push(tree);
            }
            rounds.push(trees);
            if round % 10 == 0 {
                debug!(round, rows = rows.len(), "boosting round");
            }
        }

        Self { n_classes, init, rounds }
    }
}

impl Classifier for BoostedTrees {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        let mut raw = Array2::from_shape_fn((x.nrows(), self.n_classes), |(_, k)| self.init[k]);
        for trees in &self.rounds {
            for (k, tree) in trees.iter().enumerate() {
                for (i, row) in x.rows().into_iter().enumerate() {
                    raw[[i, k]] += tree.predict_row(row);
                }
            }
        }
        softmax_rows(&mut raw);
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::{accuracy, blobs};

    #[test]
    fn prior_only_model_predicts_majority() {
        let (x, mut y) = blobs(10, 1);
        y.fill(2);
        y[0] = 0;
        let mut p = BoostingParams::standard();
        p.n_estimators = 0;
        let m = BoostedTrees::fit(&x, &y, 3, &p, 0);
        let proba = m.predict_proba(&x).unwrap();
        assert!(proba[[5, 2]] > 0.9);
    }

    #[test]
    fn subsampled_boosting_is_seed_deterministic() {
        let (x, y) = blobs(30, 2);
        let p = BoostingParams::histogram();
        let a = BoostedTrees::fit(&x, &y, 3, &p, 5).predict_proba(&x).unwrap();
        let b = BoostedTrees::fit(&x, &y, 3, &p, 5).predict_proba(&x).unwrap();
        assert_eq!(a, b);
        assert!(accuracy(&BoostedTrees::fit(&x, &y, 3, &p, 5).predict(&x).unwrap(), &y) > 0.9);
    }
}
