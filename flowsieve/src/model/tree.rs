// flowsieve/src/model/tree.rs
//
// Histogram-binned regression tree fitted to gradient/hessian pairs. Used as
// the weak learner of both boosted families.
//
// Features are bucketed once per boosting run (Binner); split search then
// walks per-node histograms instead of sorted columns. A node splits on
// `value <= threshold`, where thresholds are bin edges in raw feature units,
// so prediction needs no binner.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

// ── Binning ───────────────────────────────────────────────────────────────────

pub(crate) struct Binner {
    /// Sorted, deduplicated upper edges per feature. Bin `b` holds values in
    /// `(edges[b-1], edges[b]]`; the last bin is open-ended.
    edges: Vec<Vec<f64>>,
}

impl Binner {
    pub fn fit(x: &Array2<f64>, max_bins: usize) -> Self {
        let edges = x
            .columns()
            .into_iter()
            .map(|col| {
                let mut vals: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
                vals.sort_by(|a, b| a.total_cmp(b));
                vals.dedup();
                if vals.len() <= max_bins {
                    vals.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
                } else {
                    let mut e: Vec<f64> = (1..max_bins)
                        .map(|k| vals[k * vals.len() / max_bins])
                        .collect();
                    e.dedup();
                    e
                }
            })
            .collect();
        Self { edges }
    }

    pub fn bin(&self, feature: usize, value: f64) -> usize {
        self.edges[feature].partition_point(|e| *e < value)
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    /// Column-major bin indices for the whole matrix.
    pub fn transform(&self, x: &Array2<f64>) -> Vec<Vec<u16>> {
        x.columns()
            .into_iter()
            .enumerate()
            .map(|(f, col)| col.iter().map(|v| self.bin(f, *v) as u16).collect())
            .collect()
    }

    fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.edges[feature][bin]
    }

    fn n_features(&self) -> usize {
        self.edges.len()
    }
}

// ── Tree ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_leaf:  usize,
    pub lambda:    f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    g: f64,
    h: f64,
    n: usize,
}

struct Grower<'a> {
    binner: &'a Binner,
    bins:   &'a [Vec<u16>],
    grad:   &'a [f64],
    hess:   &'a [f64],
    params: TreeParams,
    /// Multiplier applied to every leaf (shrinkage).
    scale:  f64,
    nodes:  Vec<Node>,
}

impl RegressionTree {
    /// Fit on `rows` (indices into the binned matrix). Leaves hold the Newton
    /// step `-G / (H + lambda)` times `scale`.
    pub fn fit(
        binner: &Binner,
        bins:   &[Vec<u16>],
        grad:   &[f64],
        hess:   &[f64],
        rows:   Vec<usize>,
        params: TreeParams,
        scale:  f64,
    ) -> Self {
        let mut g = Grower { binner, bins, grad, hess, params, scale, nodes: Vec::new() };
        g.grow(rows, 0);
        Self { nodes: g.nodes }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf(v) => return *v,
                Node::Split { feature, threshold, left, right } => {
                    i = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Grower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let (g, h) = rows.iter().fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]));
        self.nodes.push(Node::Leaf(self.leaf_value(g, h)));

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_leaf.max(1) {
            return id;
        }
        let Some((feature, bin)) = self.best_split(&rows, g, h) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| self.bins[feature][r] as usize <= bin);
        let left  = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold: self.binner.threshold(feature, bin),
            left,
            right,
        };
        id
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.scale
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<(usize, usize)> {
        let lambda = self.params.lambda;
        let parent = g_total * g_total / (h_total + lambda);
        let mut best: Option<(usize, usize)> = None;
        let mut best_gain = 1e-12;

        for f in 0..self.binner.n_features() {
            let n_bins = self.binner.n_bins(f);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![Bucket::default(); n_bins];
            for &r in rows {
                let b = &mut hist[self.bins[f][r] as usize];
                b.g += self.grad[r];
                b.h += self.hess[r];
                b.n += 1;
            }

            let mut left = Bucket::default();
            // The last bin has no upper edge to split on.
            for (bin, bucket) in hist.iter().enumerate().take(n_bins - 1) {
                left.g += bucket.g;
                left.h += bucket.h;
                left.n += bucket.n;
                let right_n = rows.len() - left.n;
                if left.n < self.params.min_leaf || right_n < self.params.min_leaf {
                    continue;
                }
                let (rg, rh) = (g_total - left.g, h_total - left.h);
                let gain = left.g * left.g / (left.h + lambda) + rg * rg / (rh + lambda) - parent;
                if gain > best_gain {
                    best_gain = gain;
                    best = Some((f, bin));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn binner_respects_edges() {
        let x = array![[1.0], [2.0], [3.0]];
        let b = Binner::fit(&x, 16);
        assert_eq!(b.n_bins(0), 3);
        assert_eq!(b.bin(0, 1.0), 0);
        assert_eq!(b.bin(0, 1.5), 0);
        assert_eq!(b.bin(0, 2.0), 1);
        assert_eq!(b.bin(0, 99.0), 2);
    }

    #[test]
    fn binner_caps_bin_count() {
        let x = Array2::from_shape_fn((1000, 1), |(i, _)| i as f64);
        assert!(Binner::fit(&x, 32).n_bins(0) <= 32);
    }

    #[test]
    fn tree_fits_a_step() {
        // Target +1 for x <= 4, -1 above; squared loss gradients with h = 1.
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let target: Vec<f64> = (0..10).map(|i| if i <= 4 { 1.0 } else { -1.0 }).collect();
        let grad: Vec<f64> = target.iter().map(|t| -t).collect();
        let hess = vec![1.0; 10];
        let binner = Binner::fit(&x, 16);
        let bins = binner.transform(&x);
        let params = TreeParams { max_depth: 3, min_leaf: 1, lambda: 0.0 };
        let tree = RegressionTree::fit(&binner, &bins, &grad, &hess, (0..10).collect(), params, 1.0);
        assert_eq!(tree.depth(), 1);
        for i in 0..10 {
            let pred = tree.predict_row(x.row(i));
            assert!((pred - target[i]).abs() < 1e-12, "row {i}: {pred}");
        }
    }
}
