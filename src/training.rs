use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{ArtifactMember, ModelArtifact, Standardizer, TrainingSummary};
use crate::boosting::{BoostingParams, GradientBoostedTrees};
use crate::calibration::{empirical_outcome_probs, evaluate_probs, fit_temperature};
use crate::ensemble::{self, Classifier, ClassifierModel};
use crate::features::{DEFAULT_MANIFEST, FeatureManifest, vectorize};
use crate::forest::{ForestParams, RandomForest};
use crate::history::HistoricalMatch;
use crate::outcome::{ClassSet, Outcome, OutcomeDist};
use crate::team_form::{FormConfig, FormTracker};
use crate::tree::TreeParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    Equal,
    /// Proportional to holdout log-loss improvement over the class prior.
    Skill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberKind {
    Boosted(BoostingParams),
    Forest(ForestParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSpec {
    pub name: String,
    pub kind: MemberKind,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub classes: ClassSet,
    pub manifest: FeatureManifest,
    pub members: Vec<MemberSpec>,
    pub weighting: Weighting,
    pub holdout_fraction: f64,
    /// Rows where either side has fewer recorded matches are left out.
    pub min_history: u32,
    pub refit_full: bool,
    pub form: FormConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            classes: ClassSet::ThreeWay,
            manifest: DEFAULT_MANIFEST.clone(),
            members: default_members(42),
            weighting: Weighting::Equal,
            holdout_fraction: 0.2,
            min_history: 3,
            refit_full: true,
            form: FormConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Smaller members for smoke runs and tests.
    pub fn quick() -> Self {
        let boosted =
            |name: &str, depth: usize, rounds: usize, subsample: f64, seed: u64| MemberSpec {
                name: name.to_string(),
                kind: MemberKind::Boosted(BoostingParams {
                    n_rounds: rounds,
                    learning_rate: 0.1,
                    subsample,
                    tree: TreeParams {
                        max_depth: depth,
                        min_samples_leaf: 15,
                        max_features: None,
                        lambda: 1.0,
                    },
                    seed,
                }),
            };
        Self {
            members: vec![
                boosted("gbt_deep", 3, 15, 1.0, 1),
                boosted("gbt_shallow", 2, 15, 1.0, 2),
                MemberSpec {
                    name: "forest".to_string(),
                    kind: MemberKind::Forest(ForestParams {
                        n_trees: 12,
                        tree: TreeParams {
                            max_depth: 5,
                            min_samples_leaf: 10,
                            max_features: None,
                            lambda: 0.0,
                        },
                        seed: 3,
                    }),
                },
                boosted("gbt_stochastic", 3, 15, 0.7, 4),
            ],
            refit_full: false,
            ..Self::default()
        }
    }
}

/// Two boosted models of different depth and learning rate, a random forest,
/// and a row-subsampled boosted model.
pub fn default_members(seed: u64) -> Vec<MemberSpec> {
    vec![
        MemberSpec {
            name: "gbt_deep".to_string(),
            kind: MemberKind::Boosted(BoostingParams {
                n_rounds: 120,
                learning_rate: 0.05,
                subsample: 1.0,
                tree: TreeParams {
                    max_depth: 5,
                    min_samples_leaf: 20,
                    max_features: None,
                    lambda: 1.0,
                },
                seed,
            }),
        },
        MemberSpec {
            name: "gbt_shallow".to_string(),
            kind: MemberKind::Boosted(BoostingParams {
                n_rounds: 80,
                learning_rate: 0.1,
                subsample: 1.0,
                tree: TreeParams {
                    max_depth: 3,
                    min_samples_leaf: 20,
                    max_features: None,
                    lambda: 1.0,
                },
                seed: seed + 1,
            }),
        },
        MemberSpec {
            name: "forest".to_string(),
            kind: MemberKind::Forest(ForestParams {
                n_trees: 80,
                tree: TreeParams {
                    max_depth: 8,
                    min_samples_leaf: 10,
                    max_features: None,
                    lambda: 0.0,
                },
                seed: seed + 2,
            }),
        },
        MemberSpec {
            name: "gbt_stochastic".to_string(),
            kind: MemberKind::Boosted(BoostingParams {
                n_rounds: 100,
                learning_rate: 0.08,
                subsample: 0.7,
                tree: TreeParams {
                    max_depth: 4,
                    min_samples_leaf: 20,
                    max_features: None,
                    lambda: 1.0,
                },
                seed: seed + 3,
            }),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<Outcome>,
    pub skipped_cold: usize,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn class_labels(&self, classes: ClassSet) -> Vec<usize> {
        self.labels.iter().map(|o| classes.class_index(*o)).collect()
    }
}

/// Walk-forward feature rows: every match is vectorized from stats recorded
/// strictly before it, through the same vectorizer live inference uses.
pub fn build_dataset(
    matches: &[HistoricalMatch],
    manifest: &FeatureManifest,
    cfg: &TrainingConfig,
) -> Result<Dataset> {
    let mut sorted: Vec<&HistoricalMatch> =
        matches.iter().filter(|m| m.outcome().is_some()).collect();
    sorted.sort_by(|a, b| a.match_date.cmp(&b.match_date).then_with(|| a.key().cmp(&b.key())));

    let mut tracker = FormTracker::new(cfg.form);
    let mut rows = Vec::with_capacity(sorted.len());
    let mut labels = Vec::with_capacity(sorted.len());
    let mut skipped_cold = 0usize;

    for m in sorted {
        let home = tracker.team_stats(&m.home_team, m.match_date);
        let away = tracker.team_stats(&m.away_team, m.match_date);
        let warm = home.matches_played.unwrap_or(0) >= cfg.min_history
            && away.matches_played.unwrap_or(0) >= cfg.min_history;
        if warm && let Some(outcome) = m.outcome() {
            let ctx = tracker.match_context(&m.home_team, &m.away_team, m.match_date);
            let v = vectorize(&home, &away, &ctx, manifest)
                .with_context(|| format!("vectorize {}", m.label()))?;
            rows.push(v.vector.values().to_vec());
            labels.push(outcome);
        } else {
            skipped_cold += 1;
        }
        tracker.record(m);
    }

    Ok(Dataset {
        rows,
        labels,
        skipped_cold,
    })
}

fn fit_member(
    spec: &MemberSpec,
    x: &[Vec<f64>],
    y: &[usize],
    n_classes: usize,
) -> Result<ClassifierModel> {
    match &spec.kind {
        MemberKind::Boosted(p) => GradientBoostedTrees::fit(x, y, n_classes, p)
            .map(ClassifierModel::Boosted)
            .map_err(|e| anyhow!("{}: {e}", spec.name)),
        MemberKind::Forest(p) => RandomForest::fit(x, y, n_classes, p)
            .map(ClassifierModel::Forest)
            .map_err(|e| anyhow!("{}: {e}", spec.name)),
    }
}

fn fit_members(
    specs: &[MemberSpec],
    x: &[Vec<f64>],
    y: &[usize],
    n_classes: usize,
) -> Result<Vec<ArtifactMember>> {
    specs
        .par_iter()
        .map(|spec| {
            fit_member(spec, x, y, n_classes).map(|model| ArtifactMember {
                name: spec.name.clone(),
                model,
            })
        })
        .collect()
}

pub fn train_artifact(
    matches: &[HistoricalMatch],
    cfg: &TrainingConfig,
    now: DateTime<Utc>,
) -> Result<ModelArtifact> {
    cfg.manifest.validate()?;
    if cfg.members.is_empty() {
        bail!("training config lists no members");
    }
    let data = build_dataset(matches, &cfg.manifest, cfg)?;
    if data.len() < 50 {
        bail!("only {} usable training rows (need 50)", data.len());
    }

    let train_share = 1.0 - cfg.holdout_fraction.clamp(0.0, 0.5);
    let split = ((data.len() as f64) * train_share).round() as usize;
    let split = split.clamp(1, data.len());
    let (train_rows, hold_rows) = data.rows.split_at(split);
    let (train_labels, hold_labels) = data.labels.split_at(split);

    let standardizer = Standardizer::fit(train_rows);
    let x_train: Vec<Vec<f64>> = train_rows.iter().map(|r| standardizer.transform(r)).collect();
    let y_train: Vec<usize> = train_labels.iter().map(|o| cfg.classes.class_index(*o)).collect();
    let n_classes = cfg.classes.len();

    info!(
        rows = data.len(),
        train = train_rows.len(),
        holdout = hold_rows.len(),
        cold = data.skipped_cold,
        "training ensemble"
    );
    let members = fit_members(&cfg.members, &x_train, &y_train, n_classes)?;

    let corpus = corpus_label(matches);
    let provisional = ModelArtifact::assemble(
        cfg.classes,
        cfg.manifest.clone(),
        standardizer,
        members,
        None,
        None,
        now,
    )?;

    let mut summary = TrainingSummary {
        corpus,
        train_rows: train_rows.len(),
        holdout_rows: hold_rows.len(),
        holdout: None,
        member_holdout: Vec::new(),
        fitted_temperature: None,
    };
    let mut weights = None;

    if !hold_rows.is_empty() {
        let x_hold: Vec<Vec<f64>> =
            hold_rows.iter().map(|r| provisional.standardizer.transform(r)).collect();
        let prior = empirical_outcome_probs(train_labels, cfg.classes);
        let prior_ll = evaluate_probs(&vec![prior; hold_labels.len()], hold_labels).log_loss;

        let mut skills = Vec::with_capacity(provisional.members.len());
        for member in &provisional.members {
            let dists = score_rows(&member.model, &x_hold, cfg.classes);
            let m = evaluate_probs(&dists, hold_labels);
            info!(member = %member.name, log_loss = m.log_loss, accuracy = m.accuracy, "holdout");
            skills.push((prior_ll - m.log_loss).max(0.0));
            summary.member_holdout.push((member.name.clone(), m));
        }
        if cfg.weighting == Weighting::Skill {
            if skills.iter().sum::<f64>() > 0.0 {
                weights = Some(skills);
            } else {
                warn!("no member beat the class prior on holdout, keeping equal weights");
            }
        }

        let weighted = ModelArtifact {
            weights: weights.clone(),
            ..provisional.clone()
        };
        let scoring: Vec<ensemble::ScoringMember<'_>> = weighted
            .members
            .iter()
            .zip(weighted.effective_weights())
            .map(|(m, weight)| ensemble::ScoringMember {
                name: &m.name,
                model: &m.model,
                weight,
            })
            .collect();
        let ensemble_dists: Vec<OutcomeDist> = x_hold
            .iter()
            .filter_map(|row| ensemble::combine(&scoring, row, cfg.classes).ok().map(|p| p.dist))
            .collect();
        if ensemble_dists.len() == hold_labels.len() {
            summary.holdout = Some(evaluate_probs(&ensemble_dists, hold_labels));
            summary.fitted_temperature = Some(fit_temperature(&ensemble_dists, hold_labels).0);
        }
    }

    let (standardizer, members) = if cfg.refit_full && !hold_rows.is_empty() {
        let standardizer = Standardizer::fit(&data.rows);
        let x_all: Vec<Vec<f64>> = data.rows.iter().map(|r| standardizer.transform(r)).collect();
        let labels = data.class_labels(cfg.classes);
        let members = fit_members(&cfg.members, &x_all, &labels, n_classes)?;
        (standardizer, members)
    } else {
        (provisional.standardizer, provisional.members)
    };

    let artifact = ModelArtifact::assemble(
        cfg.classes,
        cfg.manifest.clone(),
        standardizer,
        members,
        weights,
        Some(summary),
        now,
    )?;
    if let Some(m) = artifact.training.as_ref().and_then(|t| t.holdout) {
        info!(
            artifact = %artifact.id,
            log_loss = m.log_loss,
            accuracy = m.accuracy,
            "artifact trained"
        );
    }
    Ok(artifact)
}

fn score_rows(model: &ClassifierModel, rows: &[Vec<f64>], classes: ClassSet) -> Vec<OutcomeDist> {
    rows.iter()
        .map(|r| {
            model
                .score(r)
                .ok()
                .and_then(|p| OutcomeDist::new(classes, p).ok())
                .unwrap_or_else(|| OutcomeDist::uniform(classes))
        })
        .collect()
}

pub fn corpus_label(matches: &[HistoricalMatch]) -> String {
    let mut sources: Vec<&str> = matches.iter().map(|m| m.source.as_str()).collect();
    sources.sort_unstable();
    sources.dedup();
    sources.join(",")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{TrainingConfig, Weighting, build_dataset, train_artifact};
    use crate::features::DEFAULT_MANIFEST;
    use crate::outcome::ClassSet;
    use crate::synthetic::{SyntheticConfig, generate_corpus};

    fn corpus(n: usize) -> Vec<crate::history::HistoricalMatch> {
        generate_corpus(&SyntheticConfig {
            n_matches: n,
            ..SyntheticConfig::default()
        })
    }

    #[test]
    fn cold_rows_are_skipped() {
        let cfg = TrainingConfig::quick();
        let data = build_dataset(&corpus(100), &DEFAULT_MANIFEST, &cfg).unwrap();
        // 20 teams, 10 matches per weekly round: the first three rounds are cold.
        assert_eq!(data.skipped_cold, 30);
        assert_eq!(data.len(), 70);
        assert!(data.rows.iter().all(|r| r.len() == DEFAULT_MANIFEST.len()));
    }

    #[test]
    fn trains_a_valid_binary_artifact() {
        let cfg = TrainingConfig {
            classes: ClassSet::HomeVsField,
            weighting: Weighting::Skill,
            ..TrainingConfig::quick()
        };
        let art = train_artifact(&corpus(400), &cfg, Utc::now()).unwrap();
        assert_eq!(art.members.len(), 4);
        assert!(art.validate().is_ok());
        let summary = art.training.as_ref().unwrap();
        assert!(summary.holdout.is_some());
        assert_eq!(summary.corpus, "synthetic:42");
        assert_eq!(art.effective_weights().len(), 4);
    }

    #[test]
    fn tiny_corpus_is_refused() {
        assert!(train_artifact(&corpus(40), &TrainingConfig::quick(), Utc::now()).is_err());
    }
}
