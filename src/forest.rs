use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ensemble::{Classifier, check_input};
use crate::error::ScoreError;
use crate::tree::{RegressionTree, TrainingSet, TreeParams};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 60,
            tree: TreeParams {
                max_depth: 8,
                min_samples_leaf: 5,
                max_features: None,
                lambda: 0.0,
            },
            seed: 42,
        }
    }
}

/// Bagged trees over one-hot targets; leaves hold class frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: &ForestParams,
    ) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("forest needs matching rows, got {} x / {} y", x.len(), y.len()));
        }
        if n_classes < 2 || y.iter().any(|c| *c >= n_classes) {
            return Err(format!("labels must lie in 0..{n_classes}"));
        }
        let n_features = x[0].len();
        let n = x.len();
        let targets: Vec<Vec<f64>> = y
            .iter()
            .map(|c| (0..n_classes).map(|k| if k == *c { 1.0 } else { 0.0 }).collect())
            .collect();

        let mut tree_params = params.tree;
        if tree_params.max_features.is_none() {
            tree_params.max_features = Some(((n_features as f64).sqrt().round() as usize).max(1));
        }

        // Seeds are fixed per tree index so the parallel build is reproducible.
        let trees: Vec<RegressionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(i as u64 * 7919));
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let data = TrainingSet {
                    x,
                    targets: &targets,
                    hessians: None,
                };
                RegressionTree::fit(&data, &rows, &tree_params, &mut rng)
            })
            .collect();

        Ok(Self {
            n_features,
            n_classes,
            trees,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        self.trees.iter().filter_map(|t| t.max_feature_index()).max()
    }
}

impl Classifier for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn score(&self, features: &[f64]) -> Result<Vec<f64>, ScoreError> {
        check_input(features, self.n_features)?;
        if self.trees.is_empty() {
            return Err(ScoreError::Invalid("forest has no trees".to_string()));
        }
        let mut acc = vec![0.0_f64; self.n_classes];
        for tree in &self.trees {
            let leaf = tree.predict(features);
            if leaf.len() != self.n_classes {
                return Err(ScoreError::Invalid(format!(
                    "tree leaf has {} outputs for {} classes",
                    leaf.len(),
                    self.n_classes
                )));
            }
            for (a, v) in acc.iter_mut().zip(leaf) {
                *a += v;
            }
        }
        let sum: f64 = acc.iter().sum();
        if sum <= 0.0 {
            return Err(ScoreError::Invalid("forest vote has zero mass".to_string()));
        }
        Ok(acc.into_iter().map(|a| a / sum).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{ForestParams, RandomForest};
    use crate::ensemble::Classifier;

    fn data() -> (Vec<Vec<f64>>, Vec<usize>) {
        let x: Vec<Vec<f64>> = (0..150)
            .map(|i| vec![(i % 50) as f64, ((i * 7) % 11) as f64, (i % 50) as f64 * 0.5])
            .collect();
        let y: Vec<usize> = (0..150).map(|i| (i % 50) / 17).collect();
        (x, y)
    }

    #[test]
    fn parallel_build_is_reproducible() {
        let (x, y) = data();
        let a = RandomForest::fit(&x, &y, 3, &ForestParams::default()).unwrap();
        let b = RandomForest::fit(&x, &y, 3, &ForestParams::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tree_count(), 60);
    }

    #[test]
    fn votes_form_a_distribution() {
        let (x, y) = data();
        let forest = RandomForest::fit(&x, &y, 3, &ForestParams::default()).unwrap();
        let p = forest.score(&[2.0, 3.0, 1.0]).unwrap();
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p[0] > p[2]);
    }
}
