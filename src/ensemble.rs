use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifact::ModelArtifact;
use crate::boosting::GradientBoostedTrees;
use crate::error::{PipelineError, ScoreError};
use crate::features::FeatureVector;
use crate::forest::RandomForest;
use crate::outcome::{ClassSet, OutcomeDist};

pub trait Classifier: Send + Sync {
    fn n_features(&self) -> usize;
    fn n_classes(&self) -> usize;
    /// Class probabilities in the artifact's class order.
    fn score(&self, features: &[f64]) -> Result<Vec<f64>, ScoreError>;
}

pub(crate) fn check_input(features: &[f64], expected: usize) -> Result<(), ScoreError> {
    if features.len() != expected {
        return Err(ScoreError::Shape {
            expected,
            got: features.len(),
        });
    }
    if let Some(pos) = features.iter().position(|v| !v.is_finite()) {
        return Err(ScoreError::NonFinite(pos));
    }
    Ok(())
}

/// Fixed distribution regardless of input. Serves as a base-rate reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPrior {
    pub n_features: usize,
    pub probs: Vec<f64>,
}

impl Classifier for ClassPrior {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.probs.len()
    }

    fn score(&self, features: &[f64]) -> Result<Vec<f64>, ScoreError> {
        check_input(features, self.n_features)?;
        Ok(self.probs.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierModel {
    Boosted(GradientBoostedTrees),
    Forest(RandomForest),
    Prior(ClassPrior),
}

impl ClassifierModel {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierModel::Boosted(_) => "boosted",
            ClassifierModel::Forest(_) => "forest",
            ClassifierModel::Prior(_) => "prior",
        }
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        match self {
            ClassifierModel::Boosted(m) => m.max_feature_index(),
            ClassifierModel::Forest(m) => m.max_feature_index(),
            ClassifierModel::Prior(_) => None,
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            ClassifierModel::Boosted(m) => m,
            ClassifierModel::Forest(m) => m,
            ClassifierModel::Prior(m) => m,
        }
    }
}

impl Classifier for ClassifierModel {
    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn score(&self, features: &[f64]) -> Result<Vec<f64>, ScoreError> {
        self.inner().score(features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub member: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    pub dist: OutcomeDist,
    pub contributors: usize,
    pub failures: Vec<MemberFailure>,
}

pub struct ScoringMember<'a> {
    pub name: &'a str,
    pub model: &'a dyn Classifier,
    pub weight: f64,
}

/// Weighted arithmetic mean of member distributions. Members that fail are
/// dropped and the remaining weights renormalised.
pub fn combine(
    members: &[ScoringMember<'_>],
    features: &[f64],
    classes: ClassSet,
) -> Result<EnsemblePrediction, PipelineError> {
    let scored: Vec<Result<(f64, OutcomeDist), MemberFailure>> = members
        .par_iter()
        .map(|m| {
            m.model
                .score(features)
                .map_err(|e| e.to_string())
                .and_then(|p| OutcomeDist::new(classes, p))
                .map(|d| (m.weight, d))
                .map_err(|reason| MemberFailure {
                    member: m.name.to_string(),
                    reason,
                })
        })
        .collect();

    let mut survivors = Vec::with_capacity(scored.len());
    let mut failures = Vec::new();
    for item in scored {
        match item {
            Ok(ok) => survivors.push(ok),
            Err(failure) => {
                warn!(
                    member = %failure.member,
                    reason = %failure.reason,
                    "ensemble member dropped"
                );
                failures.push(failure);
            }
        }
    }

    if survivors.is_empty() {
        return Err(PipelineError::EnsembleExhausted {
            attempted: members.len(),
            reasons: failures
                .into_iter()
                .map(|f| format!("{}: {}", f.member, f.reason))
                .collect(),
        });
    }

    let mut weight_sum: f64 = survivors.iter().map(|(w, _)| *w).sum();
    if !(weight_sum.is_finite() && weight_sum > 0.0) {
        for (w, _) in survivors.iter_mut() {
            *w = 1.0;
        }
        weight_sum = survivors.len() as f64;
    }

    let mut acc = vec![0.0_f64; classes.len()];
    for (w, dist) in &survivors {
        for (a, p) in acc.iter_mut().zip(dist.probs()) {
            *a += w / weight_sum * p;
        }
    }

    Ok(EnsemblePrediction {
        dist: OutcomeDist::normalized(classes, acc),
        contributors: survivors.len(),
        failures,
    })
}

pub fn predict(
    vector: &FeatureVector,
    artifact: &ModelArtifact,
) -> Result<EnsemblePrediction, PipelineError> {
    vector.ensure_matches(&artifact.manifest)?;
    let features = artifact.standardizer.transform(vector.values());
    let weights = artifact.effective_weights();
    let members: Vec<ScoringMember<'_>> = artifact
        .members
        .iter()
        .zip(weights)
        .map(|(m, weight)| ScoringMember {
            name: &m.name,
            model: &m.model,
            weight,
        })
        .collect();
    combine(&members, &features, artifact.classes)
}

#[cfg(test)]
mod tests {
    use super::{ClassPrior, ScoringMember, combine};
    use crate::error::PipelineError;
    use crate::outcome::{ClassSet, Selection};

    fn prior(p: &[f64]) -> ClassPrior {
        ClassPrior {
            n_features: 2,
            probs: p.to_vec(),
        }
    }

    #[test]
    fn equal_weights_average_probabilities() {
        let a = prior(&[0.2, 0.8]);
        let b = prior(&[0.4, 0.6]);
        let members = [
            ScoringMember { name: "a", model: &a, weight: 0.5 },
            ScoringMember { name: "b", model: &b, weight: 0.5 },
        ];
        let out = combine(&members, &[0.0, 0.0], ClassSet::HomeVsField).unwrap();
        assert!((out.dist.get(Selection::HomeWin).unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(out.contributors, 2);
    }

    #[test]
    fn failing_member_is_dropped() {
        let good = prior(&[0.3, 0.7]);
        let wide = ClassPrior {
            n_features: 5,
            probs: vec![0.9, 0.1],
        };
        let members = [
            ScoringMember { name: "good", model: &good, weight: 0.25 },
            ScoringMember { name: "wide", model: &wide, weight: 0.75 },
        ];
        let out = combine(&members, &[1.0, 2.0], ClassSet::HomeVsField).unwrap();
        assert_eq!(out.contributors, 1);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].member, "wide");
        assert!((out.dist.get(Selection::HomeWin).unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn all_failing_is_exhausted() {
        let bad = prior(&[0.5, 0.5, 0.0]);
        let members = [ScoringMember { name: "bad", model: &bad, weight: 1.0 }];
        let err = combine(&members, &[0.0, 0.0], ClassSet::HomeVsField).unwrap_err();
        assert!(matches!(err, PipelineError::EnsembleExhausted { attempted: 1, .. }));
    }
}
