// flowsieve/src/model/forest.rs
//
// Random forest: each tree is a linfa CART fitted on a bootstrap sample over a
// random subset of the columns. Class probability is the share of trees
// voting for it.

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Classifier;
use crate::error::InferenceError;

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees:          usize,
    pub max_depth:        Option<usize>,
    /// Fraction of columns each tree sees.
    pub feature_fraction: f64,
    pub min_weight_split: f32,
    pub min_weight_leaf:  f32,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees:          100,
            max_depth:        Some(12),
            feature_fraction: 0.6,
            min_weight_split: 4.0,
            min_weight_leaf:  2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestTree {
    columns: Vec<usize>,
    tree:    DecisionTree<f64, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_classes: usize,
    trees:     Vec<ForestTree>,
}

impl RandomForest {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<usize>,
        n_classes: usize,
        p: &ForestParams,
        seed: u64,
    ) -> Result<Self, String> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 {
            return Err("empty training matrix".into());
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let n_cols = ((d as f64 * p.feature_fraction).ceil() as usize).clamp(1, d);

        let mut trees = Vec::with_capacity(p.n_trees);
        for _ in 0..p.n_trees {
            let boot: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut columns = sample(&mut rng, d, n_cols).into_vec();
            columns.sort_unstable();

            let bx = x.select(Axis(0), &boot).select(Axis(1), &columns);
            let by = y.select(Axis(0), &boot);
            let dataset = DatasetBase::new(bx, by);

            match DecisionTree::params()
                .max_depth(p.max_depth)
                .min_weight_split(p.min_weight_split)
                .min_weight_leaf(p.min_weight_leaf)
                .fit(&dataset)
            {
                Ok(tree) => trees.push(ForestTree { columns, tree }),
                Err(e) => warn!(error = %e, "forest tree failed to fit, skipping"),
            }
        }

        if trees.is_empty() {
            return Err("all trees failed to fit".into());
        }
        Ok(Self { n_classes, trees })
    }
}

impl Classifier for RandomForest {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, InferenceError> {
        let mut votes = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for t in &self.trees {
            if let Some(&max_col) = t.columns.last() {
                if max_col >= x.ncols() {
                    return Err(InferenceError::FeatureMismatch { expected: max_col + 1, got: x.ncols() });
                }
            }
            let sub = x.select(Axis(1), &t.columns);
            let pred = t.tree.predict(&sub);
            for (i, &class) in pred.iter().enumerate() {
                if class < self.n_classes {
                    votes[[i, class]] += 1.0;
                }
            }
        }
        votes /= self.trees.len() as f64;
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testutil::{accuracy, blobs};

    #[test]
    fn vote_shares_sum_to_one() {
        let (x, y) = blobs(20, 9);
        let p = ForestParams { n_trees: 15, ..Default::default() };
        let f = RandomForest::fit(&x, &y, 3, &p, 1).unwrap();
        let proba = f.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(accuracy(&f.predict(&x).unwrap(), &y) > 0.9);
    }

    #[test]
    fn narrow_input_is_rejected() {
        let (x, y) = blobs(10, 9);
        let f = RandomForest::fit(&x, &y, 3, &ForestParams { n_trees: 5, ..Default::default() }, 1).unwrap();
        let narrow = Array2::<f64>::zeros((1, 1));
        assert!(f.predict_proba(&narrow).is_err());
    }
}
