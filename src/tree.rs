use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
    /// L2 penalty on Newton leaf values.
    pub lambda: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_samples_leaf: 10,
            max_features: None,
            lambda: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        values: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Multi-output CART regression tree. Every leaf holds one value per output,
/// so a single tree serves all classes at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_outputs: usize,
}

pub struct TrainingSet<'a> {
    pub x: &'a [Vec<f64>],
    pub targets: &'a [Vec<f64>],
    /// Per-row, per-output second derivatives. When present, leaves take a
    /// Newton step `sum(g) / (sum(h) + lambda)` instead of the target mean.
    pub hessians: Option<&'a [Vec<f64>]>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    pub fn fit<R: Rng>(
        data: &TrainingSet<'_>,
        rows: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let n_outputs = data.targets.first().map(|t| t.len()).unwrap_or(0);
        let mut tree = Self {
            nodes: Vec::new(),
            n_outputs,
        };
        tree.grow(data, rows.to_vec(), 0, params, rng);
        tree
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    pub fn predict(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { values }) => return values,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
                None => return &[],
            }
        }
    }

    /// Highest feature index any split reads, used to validate loaded models.
    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    fn grow<R: Rng>(
        &mut self,
        data: &TrainingSet<'_>,
        rows: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut R,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { values: Vec::new() });

        let can_split =
            depth < params.max_depth && rows.len() >= params.min_samples_leaf.max(1) * 2;
        let best = if can_split {
            best_split(data, &rows, params, rng)
        } else {
            None
        };

        match best {
            Some(split) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|r| data.x[**r][split.feature] <= split.threshold);
                let left = self.grow(data, left_rows, depth + 1, params, rng);
                let right = self.grow(data, right_rows, depth + 1, params, rng);
                self.nodes[idx] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                };
            }
            None => {
                self.nodes[idx] = Node::Leaf {
                    values: leaf_values(data, &rows, self.n_outputs, params.lambda),
                };
            }
        }
        idx
    }
}

fn leaf_values(data: &TrainingSet<'_>, rows: &[usize], n_outputs: usize, lambda: f64) -> Vec<f64> {
    let mut sum = vec![0.0_f64; n_outputs];
    for r in rows {
        for (k, t) in data.targets[*r].iter().enumerate() {
            sum[k] += t;
        }
    }
    match data.hessians {
        Some(h) => {
            let mut hsum = vec![0.0_f64; n_outputs];
            for r in rows {
                for (k, v) in h[*r].iter().enumerate() {
                    hsum[k] += v;
                }
            }
            sum.iter()
                .zip(hsum)
                .map(|(g, h)| g / (h + lambda).max(1e-9))
                .collect()
        }
        None => {
            let n = rows.len().max(1) as f64;
            sum.into_iter().map(|s| s / n).collect()
        }
    }
}

fn best_split<R: Rng>(
    data: &TrainingSet<'_>,
    rows: &[usize],
    params: &TreeParams,
    rng: &mut R,
) -> Option<Candidate> {
    let n_features = data.x.first().map(|r| r.len()).unwrap_or(0);
    if n_features == 0 {
        return None;
    }
    let features: Vec<usize> = match params.max_features {
        Some(m) if m < n_features => sample(rng, n_features, m.max(1)).into_vec(),
        _ => (0..n_features).collect(),
    };

    let n_outputs = data.targets[rows[0]].len();
    let n = rows.len();
    let mut total = vec![0.0_f64; n_outputs];
    for r in rows {
        for (k, t) in data.targets[*r].iter().enumerate() {
            total[k] += t;
        }
    }
    let parent_score: f64 = total.iter().map(|s| s * s / n as f64).sum();
    let min_leaf = params.min_samples_leaf.max(1);

    let mut best: Option<Candidate> = None;
    let mut sorted = rows.to_vec();
    let mut left = vec![0.0_f64; n_outputs];

    for f in features {
        sorted.sort_by(|a, b| data.x[*a][f].total_cmp(&data.x[*b][f]));
        left.iter_mut().for_each(|v| *v = 0.0);

        for i in 0..n - 1 {
            for (k, t) in data.targets[sorted[i]].iter().enumerate() {
                left[k] += t;
            }
            let nl = i + 1;
            let nr = n - nl;
            if nl < min_leaf || nr < min_leaf {
                continue;
            }
            let xv = data.x[sorted[i]][f];
            let xn = data.x[sorted[i + 1]][f];
            if xv == xn {
                continue;
            }
            let mut score = 0.0_f64;
            for k in 0..n_outputs {
                let r = total[k] - left[k];
                score += left[k] * left[k] / nl as f64 + r * r / nr as f64;
            }
            let gain = score - parent_score;
            if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                best = Some(Candidate {
                    feature: f,
                    threshold: 0.5 * (xv + xn),
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{RegressionTree, TrainingSet, TreeParams};

    #[test]
    fn splits_on_the_informative_feature() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 7) as f64, i as f64]).collect();
        let targets: Vec<Vec<f64>> = (0..40)
            .map(|i| if i < 20 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();
        let rows: Vec<usize> = (0..40).collect();
        let data = TrainingSet {
            x: &x,
            targets: &targets,
            hessians: None,
        };
        let params = TreeParams {
            max_depth: 1,
            min_samples_leaf: 2,
            max_features: None,
            lambda: 0.0,
        };
        let tree = RegressionTree::fit(&data, &rows, &params, &mut StdRng::seed_from_u64(1));
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.max_feature_index(), Some(1));
        assert_eq!(tree.predict(&[0.0, 3.0]), &[1.0, 0.0]);
        assert_eq!(tree.predict(&[0.0, 33.0]), &[0.0, 1.0]);
    }

    #[test]
    fn constant_targets_make_a_single_leaf() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let targets = vec![vec![0.25]; 30];
        let rows: Vec<usize> = (0..30).collect();
        let data = TrainingSet {
            x: &x,
            targets: &targets,
            hessians: None,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let tree = RegressionTree::fit(&data, &rows, &TreeParams::default(), &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert!((tree.predict(&[4.0])[0] - 0.25).abs() < 1e-12);
    }
}
