use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, LiveModel, ModelArtifact};
use crate::backtest::{BacktestConfig, ComparisonReport, Harness, Provenance, time_split};
use crate::calibration::DriftReport;
use crate::history::HistoricalMatch;
use crate::training::{TrainingConfig, train_artifact};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessPolicy {
    pub max_age_days: f64,
    /// Newest share of the corpus held back to compare challenger and live.
    pub validation_fraction: f64,
    pub min_validation_matches: usize,
    /// Challenger log loss may exceed the live model's by at most this much.
    pub log_loss_tolerance: f64,
    pub threshold: f64,
    /// Promote models validated only on synthetic or mixed corpora.
    pub allow_synthetic: bool,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 7.0,
            validation_fraction: 0.2,
            min_validation_matches: 50,
            log_loss_tolerance: 0.0,
            threshold: 0.60,
            allow_synthetic: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrainReason {
    NoLiveModel,
    Stale { age_days: f64 },
    Drift(DriftReport),
    Forced,
}

impl std::fmt::Display for RetrainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrainReason::NoLiveModel => write!(f, "no live model"),
            RetrainReason::Stale { age_days } => write!(f, "live model is {age_days:.1} days old"),
            RetrainReason::Drift(d) => write!(
                f,
                "accuracy {:.1}% over last {} settled picks below {:.1}%",
                d.accuracy * 100.0,
                d.evaluated,
                d.floor * 100.0
            ),
            RetrainReason::Forced => write!(f, "forced"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetrainOutcome {
    NotNeeded,
    Promoted {
        artifact: Arc<ModelArtifact>,
        reason: RetrainReason,
        comparison: Option<ComparisonReport>,
    },
    Rejected {
        challenger_id: String,
        reason: RetrainReason,
        why: String,
        comparison: Option<ComparisonReport>,
    },
}

impl RetrainOutcome {
    pub fn promoted(&self) -> Option<&Arc<ModelArtifact>> {
        match self {
            RetrainOutcome::Promoted { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}

pub struct RetrainScheduler {
    store: ArtifactStore,
    live: Arc<LiveModel>,
    training: TrainingConfig,
    backtest: BacktestConfig,
    policy: StalenessPolicy,
}

impl RetrainScheduler {
    pub fn new(
        store: ArtifactStore,
        live: Arc<LiveModel>,
        training: TrainingConfig,
        backtest: BacktestConfig,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            store,
            live,
            training,
            backtest,
            policy,
        }
    }

    pub fn live(&self) -> &Arc<LiveModel> {
        &self.live
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn due(&self, drift: Option<&DriftReport>, now: DateTime<Utc>) -> Option<RetrainReason> {
        let Some(current) = self.live.current() else {
            return Some(RetrainReason::NoLiveModel);
        };
        let age_days = current.age_days(now);
        if age_days > self.policy.max_age_days {
            return Some(RetrainReason::Stale { age_days });
        }
        match drift {
            Some(d) if d.drifting => Some(RetrainReason::Drift(*d)),
            _ => None,
        }
    }

    /// Retrains when due (or forced), validates the challenger against the
    /// live model on the newest slice of the corpus, and promotes it on pass.
    pub fn maybe_retrain(
        &self,
        corpus: &[HistoricalMatch],
        drift: Option<&DriftReport>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<RetrainOutcome> {
        let reason = if force {
            RetrainReason::Forced
        } else {
            match self.due(drift, now) {
                Some(reason) => reason,
                None => return Ok(RetrainOutcome::NotNeeded),
            }
        };
        info!(%reason, corpus = corpus.len(), "retraining");

        let (train, validation) = time_split(
            corpus,
            self.policy.validation_fraction.clamp(0.05, 0.5),
            self.policy.min_validation_matches,
        );
        let (train, validation) = (train.as_slice(), validation.as_slice());

        let challenger = train_artifact(train, &self.training, now).context("train challenger")?;
        let provenance = Provenance::of(validation);
        let baseline = self.live.current();
        let comparison = baseline.as_ref().map(|b| {
            Harness::new(self.backtest)
                .with_warmup(train)
                .compare(validation, b, &challenger, self.policy.threshold)
        });

        if let Some(why) = self.rejection(&provenance, comparison.as_ref(), validation.len()) {
            warn!(challenger = %challenger.id, %why, "challenger rejected");
            return Ok(RetrainOutcome::Rejected {
                challenger_id: challenger.id,
                reason,
                why,
                comparison,
            });
        }

        self.store.save(&challenger)?;
        self.store.promote(&challenger.id)?;
        let id = challenger.id.clone();
        let previous = self.live.swap(challenger);
        info!(
            promoted = %id,
            replaced = previous.as_ref().map(|p| p.id.as_str()).unwrap_or("none"),
            "challenger promoted"
        );
        let artifact = self
            .live
            .current()
            .context("live model empty right after promotion")?;
        Ok(RetrainOutcome::Promoted {
            artifact,
            reason,
            comparison,
        })
    }

    fn rejection(
        &self,
        provenance: &Provenance,
        comparison: Option<&ComparisonReport>,
        validated: usize,
    ) -> Option<String> {
        if !provenance.is_live_validated() && !self.policy.allow_synthetic {
            return Some(format!("validation corpus is {}", provenance.label()));
        }
        let cmp = comparison?;
        if validated == 0 || cmp.challenger.evaluated == 0 {
            return Some("challenger produced no predictions on the validation slice".to_string());
        }
        if cmp.log_loss_delta > self.policy.log_loss_tolerance {
            return Some(format!(
                "log loss {:.4} vs live {:.4}",
                cmp.challenger.metrics.log_loss, cmp.baseline.metrics.log_loss
            ));
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Checked { due: bool },
    Promoted { id: String, reason: String },
    Rejected { id: String, why: String },
    Failed(String),
}

/// Inputs re-read on every poll: the latest corpus and the ledger's drift
/// view.
pub trait RetrainInputs: Send + 'static {
    fn corpus(&mut self) -> Result<Vec<HistoricalMatch>>;
    fn drift(&mut self) -> Option<DriftReport>;
}

/// Polls the scheduler in the background until `stop` is raised. Inference
/// keeps reading the live model throughout; promotion is a pointer swap.
pub fn spawn_scheduler<I: RetrainInputs>(
    scheduler: Arc<RetrainScheduler>,
    mut inputs: I,
    poll: Duration,
    tx: Sender<SchedulerEvent>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut last_check: Option<Instant> = None;
        while !stop.load(Ordering::Relaxed) {
            if last_check.is_none_or(|t| t.elapsed() >= poll) {
                last_check = Some(Instant::now());
                let event = run_once(&scheduler, &mut inputs);
                if tx.send(event).is_err() {
                    break;
                }
            }
            thread::sleep(Duration::from_millis(200).min(poll));
        }
        info!("retrain scheduler stopped");
    })
}

fn run_once<I: RetrainInputs>(scheduler: &RetrainScheduler, inputs: &mut I) -> SchedulerEvent {
    let now = Utc::now();
    let drift = inputs.drift();
    if scheduler.due(drift.as_ref(), now).is_none() {
        return SchedulerEvent::Checked { due: false };
    }
    let corpus = match inputs.corpus() {
        Ok(c) => c,
        Err(err) => return SchedulerEvent::Failed(format!("{err:#}")),
    };
    match scheduler.maybe_retrain(&corpus, drift.as_ref(), false, now) {
        Ok(RetrainOutcome::NotNeeded) => SchedulerEvent::Checked { due: false },
        Ok(RetrainOutcome::Promoted { artifact, reason, .. }) => SchedulerEvent::Promoted {
            id: artifact.id.clone(),
            reason: reason.to_string(),
        },
        Ok(RetrainOutcome::Rejected { challenger_id, why, .. }) => SchedulerEvent::Rejected {
            id: challenger_id,
            why,
        },
        Err(err) => {
            warn!(error = %format!("{err:#}"), "retrain failed");
            SchedulerEvent::Failed(format!("{err:#}"))
        }
    }
}
