use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ensemble::{Classifier, check_input};
use crate::error::ScoreError;
use crate::tree::{RegressionTree, TrainingSet, TreeParams};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    /// Row fraction drawn per round; below 1.0 gives stochastic boosting.
    pub subsample: f64,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 80,
            learning_rate: 0.08,
            subsample: 1.0,
            tree: TreeParams::default(),
            seed: 42,
        }
    }
}

/// Softmax gradient boosting over multi-output regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    n_features: usize,
    n_classes: usize,
    learning_rate: f64,
    base_scores: Vec<f64>,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: &BoostingParams,
    ) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("boosting needs matching rows, got {} x / {} y", x.len(), y.len()));
        }
        if n_classes < 2 || y.iter().any(|c| *c >= n_classes) {
            return Err(format!("labels must lie in 0..{n_classes}"));
        }
        let n_features = x[0].len();
        let n = x.len();

        let mut counts = vec![1.0_f64; n_classes];
        for c in y {
            counts[*c] += 1.0;
        }
        let total: f64 = counts.iter().sum();
        let base_scores: Vec<f64> = counts.iter().map(|c| (c / total).ln()).collect();

        let mut raw: Vec<Vec<f64>> = vec![base_scores.clone(); n];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let k_scale = (n_classes as f64 - 1.0) / n_classes as f64;
        let sample_size =
            ((n as f64 * params.subsample.clamp(0.1, 1.0)).round() as usize).clamp(1, n);

        for round in 0..params.n_rounds {
            let mut grads = Vec::with_capacity(n);
            let mut hess = Vec::with_capacity(n);
            for (row_raw, label) in raw.iter().zip(y) {
                let p = softmax(row_raw);
                grads.push(
                    p.iter()
                        .enumerate()
                        .map(|(k, pk)| if k == *label { 1.0 - pk } else { -pk })
                        .collect::<Vec<f64>>(),
                );
                hess.push(p.iter().map(|pk| (pk * (1.0 - pk)).max(1e-6)).collect::<Vec<f64>>());
            }

            let rows: Vec<usize> = if sample_size < n {
                let mut picked = sample(&mut rng, n, sample_size).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let data = TrainingSet {
                x,
                targets: &grads,
                hessians: Some(&hess),
            };
            let tree = RegressionTree::fit(&data, &rows, &params.tree, &mut rng);
            for (row, row_raw) in x.iter().zip(raw.iter_mut()) {
                for (k, v) in tree.predict(row).iter().enumerate() {
                    row_raw[k] += params.learning_rate * k_scale * v;
                }
            }
            if round % 20 == 0 {
                debug!(round, nodes = tree.node_count(), "boosting round");
            }
            trees.push(tree);
        }

        Ok(Self {
            n_features,
            n_classes,
            learning_rate: params.learning_rate * k_scale,
            base_scores,
            trees,
        })
    }

    pub fn rounds(&self) -> usize {
        self.trees.len()
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        self.trees.iter().filter_map(|t| t.max_feature_index()).max()
    }
}

impl Classifier for GradientBoostedTrees {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn score(&self, features: &[f64]) -> Result<Vec<f64>, ScoreError> {
        check_input(features, self.n_features)?;
        let mut raw = self.base_scores.clone();
        for tree in &self.trees {
            let leaf = tree.predict(features);
            if leaf.len() != self.n_classes {
                return Err(ScoreError::Invalid(format!(
                    "tree leaf has {} outputs for {} classes",
                    leaf.len(),
                    self.n_classes
                )));
            }
            for (k, v) in leaf.iter().enumerate() {
                raw[k] += self.learning_rate * v;
            }
        }
        Ok(softmax(&raw))
    }
}

pub fn softmax(raw: &[f64]) -> Vec<f64> {
    let mx = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = raw.iter().map(|r| (r - mx).exp()).collect();
    let sum: f64 = exp.iter().sum::<f64>().max(1e-300);
    exp.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::{BoostingParams, GradientBoostedTrees, softmax};
    use crate::ensemble::Classifier;
    use crate::tree::TreeParams;

    #[test]
    fn learns_a_threshold_rule() {
        let x: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64 / 200.0, (i % 3) as f64]).collect();
        let y: Vec<usize> = (0..200).map(|i| usize::from(i >= 100)).collect();
        let params = BoostingParams {
            n_rounds: 30,
            learning_rate: 0.3,
            subsample: 1.0,
            tree: TreeParams {
                max_depth: 2,
                min_samples_leaf: 5,
                max_features: None,
                lambda: 1.0,
            },
            seed: 7,
        };
        let model = GradientBoostedTrees::fit(&x, &y, 2, &params).unwrap();
        let low = model.score(&[0.1, 0.0]).unwrap();
        let high = model.score(&[0.9, 0.0]).unwrap();
        assert!(low[0] > 0.8);
        assert!(high[1] > 0.8);
        assert!((high.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn wrong_width_is_a_shape_error() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0, 0, 1, 1];
        let model = GradientBoostedTrees::fit(&x, &y, 2, &BoostingParams::default()).unwrap();
        assert!(model.score(&[0.0, 1.0]).is_err());
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let a = softmax(&[1.0, 2.0, 3.0]);
        let b = softmax(&[101.0, 102.0, 103.0]);
        for (p, q) in a.iter().zip(&b) {
            assert!((p - q).abs() < 1e-12);
        }
    }
}
