use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::ModelArtifact;
use crate::calibration::{Calibrator, Metrics, evaluate_probs};
use crate::edge::{break_even_rate, evaluate};
use crate::features::{MatchContext, TeamStats};
use crate::history::HistoricalMatch;
use crate::market::MarketOdds;
use crate::outcome::{Outcome, OutcomeDist, Selection};
use crate::pipeline::predict_match;
use crate::synthetic::SYNTHETIC_SOURCE_PREFIX;
use crate::team_form::{FormConfig, FormTracker};

pub const DEFAULT_SWEEP: [f64; 6] = [0.50, 0.55, 0.60, 0.65, 0.70, 0.75];

const CHUNK: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Historical { sources: Vec<String> },
    Synthetic { sources: Vec<String> },
    Mixed { historical: usize, synthetic: usize },
    Empty,
}

impl Provenance {
    pub fn of(corpus: &[HistoricalMatch]) -> Self {
        let synthetic = corpus.iter().filter(|m| is_synthetic(m)).count();
        let historical = corpus.len() - synthetic;
        let sources = || {
            corpus
                .iter()
                .map(|m| m.source.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
        };
        match (historical, synthetic) {
            (0, 0) => Provenance::Empty,
            (_, 0) => Provenance::Historical { sources: sources() },
            (0, _) => Provenance::Synthetic { sources: sources() },
            (historical, synthetic) => Provenance::Mixed { historical, synthetic },
        }
    }

    /// Only fully historical corpora may be quoted as evidence of live
    /// performance.
    pub fn is_live_validated(&self) -> bool {
        matches!(self, Provenance::Historical { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Provenance::Historical { sources } => format!("historical ({})", sources.join(", ")),
            Provenance::Synthetic { sources } => {
                format!("SYNTHETIC ({}), not live-validated", sources.join(", "))
            }
            Provenance::Mixed { historical, synthetic } => {
                format!(
                    "MIXED ({historical} historical + {synthetic} synthetic), not live-validated"
                )
            }
            Provenance::Empty => "empty corpus".to_string(),
        }
    }
}

/// Finished matches in date order, split so the newest `fraction` (at least
/// `min_tail`, at most half) forms the tail.
pub fn time_split(
    corpus: &[HistoricalMatch],
    fraction: f64,
    min_tail: usize,
) -> (Vec<HistoricalMatch>, Vec<HistoricalMatch>) {
    let mut sorted: Vec<HistoricalMatch> = corpus
        .iter()
        .filter(|m| m.outcome().is_some())
        .cloned()
        .collect();
    sorted.sort_by(|a, b| a.match_date.cmp(&b.match_date));
    let tail = ((sorted.len() as f64) * fraction.clamp(0.0, 0.5)).round() as usize;
    let tail = tail.max(min_tail).min(sorted.len() / 2);
    let head = sorted.split_off(sorted.len() - tail);
    (sorted, head)
}

fn is_synthetic(m: &HistoricalMatch) -> bool {
    m.synthetic || m.source.starts_with(SYNTHETIC_SOURCE_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub stake: f64,
    pub calibrator: Calibrator,
    pub form: FormConfig,
    /// Sweeps only name a best threshold backed by at least this many bets.
    pub min_bets_for_best: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            stake: 100.0,
            calibrator: Calibrator::default(),
            form: FormConfig::default(),
            min_bets_for_best: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetRecord {
    pub fixture: String,
    pub prediction: Selection,
    pub actual: Outcome,
    pub confidence: f64,
    pub odds: f64,
    pub edge_pct: f64,
    pub won: bool,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedMatch {
    pub fixture: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestRun {
    pub model_id: String,
    pub threshold: f64,
    pub stake: f64,
    pub provenance: Provenance,
    pub live_validated: bool,
    /// False when the run was cancelled; every counter covers the processed
    /// prefix only.
    pub completed: bool,
    pub total_matches: usize,
    pub evaluated: usize,
    pub passed_filter: usize,
    /// Passed the filter but had no usable price, so no bet was simulated.
    pub unpriced: usize,
    pub bets_placed: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_staked: f64,
    pub total_profit: f64,
    pub roi: f64,
    pub avg_odds_taken: f64,
    pub avg_winning_odds: f64,
    pub break_even_rate: f64,
    pub metrics: Metrics,
    pub skipped: Vec<SkippedMatch>,
    pub bets: Vec<BetRecord>,
}

impl BacktestRun {
    pub fn profitable(&self) -> bool {
        self.bets_placed > 0 && self.total_profit > 0.0
    }

    /// Win rate above the break-even rate implied by the prices taken.
    pub fn margin_over_break_even(&self) -> f64 {
        self.win_rate - self.break_even_rate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub provenance: Provenance,
    pub runs: Vec<BacktestRun>,
    pub best_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub baseline: BacktestRun,
    pub challenger: BacktestRun,
    pub win_rate_delta: f64,
    pub roi_delta: f64,
    pub profit_delta: f64,
    pub log_loss_delta: f64,
}

impl ComparisonReport {
    pub fn challenger_better(&self) -> bool {
        self.log_loss_delta <= 0.0 && self.roi_delta >= 0.0
    }
}

struct Prepared<'a> {
    m: &'a HistoricalMatch,
    outcome: Outcome,
    home: TeamStats,
    away: TeamStats,
    ctx: MatchContext,
}

struct Scored {
    fixture: String,
    actual: Outcome,
    dist: OutcomeDist,
    odds: Option<MarketOdds>,
}

struct Predictions {
    total: usize,
    scored: Vec<Scored>,
    skipped: Vec<SkippedMatch>,
    completed: bool,
}

pub struct Harness<'a> {
    config: BacktestConfig,
    cancel: Option<&'a AtomicBool>,
    warmup: &'a [HistoricalMatch],
}

impl<'a> Harness<'a> {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            cancel: None,
            warmup: &[],
        }
    }

    /// Matches replayed into team form before the corpus, never scored.
    pub fn with_warmup(mut self, matches: &'a [HistoricalMatch]) -> Self {
        self.warmup = matches;
        self
    }

    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(
        &self,
        corpus: &[HistoricalMatch],
        artifact: &ModelArtifact,
        threshold: f64,
    ) -> BacktestRun {
        let preds = self.predict_corpus(corpus, artifact);
        self.settle(&preds, &artifact.id, Provenance::of(corpus), threshold)
    }

    /// Scores the corpus once and re-filters it at every threshold.
    pub fn sweep(
        &self,
        corpus: &[HistoricalMatch],
        artifact: &ModelArtifact,
        thresholds: &[f64],
    ) -> SweepReport {
        let preds = self.predict_corpus(corpus, artifact);
        let provenance = Provenance::of(corpus);
        let runs: Vec<BacktestRun> = thresholds
            .par_iter()
            .map(|t| self.settle(&preds, &artifact.id, provenance.clone(), *t))
            .collect();
        let best_threshold = runs
            .iter()
            .filter(|r| r.bets_placed >= self.config.min_bets_for_best)
            .max_by(|a, b| a.roi.total_cmp(&b.roi))
            .map(|r| r.threshold);
        if !provenance.is_live_validated() {
            warn!(
                provenance = %provenance.label(),
                "sweep results do not validate live performance"
            );
        }
        SweepReport {
            provenance,
            runs,
            best_threshold,
        }
    }

    pub fn compare(
        &self,
        corpus: &[HistoricalMatch],
        baseline: &ModelArtifact,
        challenger: &ModelArtifact,
        threshold: f64,
    ) -> ComparisonReport {
        let baseline = self.run(corpus, baseline, threshold);
        let challenger = self.run(corpus, challenger, threshold);
        ComparisonReport {
            win_rate_delta: challenger.win_rate - baseline.win_rate,
            roi_delta: challenger.roi - baseline.roi,
            profit_delta: challenger.total_profit - baseline.total_profit,
            log_loss_delta: challenger.metrics.log_loss - baseline.metrics.log_loss,
            baseline,
            challenger,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    // Features come from a tracker replaying the corpus in date order, so no
    // match sees its own result.
    fn prepare<'c>(&self, corpus: &'c [HistoricalMatch]) -> (Vec<Prepared<'c>>, Vec<SkippedMatch>) {
        let mut sorted: Vec<&HistoricalMatch> = corpus.iter().collect();
        sorted.sort_by(|a, b| a.match_date.cmp(&b.match_date).then_with(|| a.key().cmp(&b.key())));
        let mut tracker = FormTracker::new(self.config.form);
        let mut warm: Vec<&HistoricalMatch> = self.warmup.iter().collect();
        warm.sort_by(|a, b| a.match_date.cmp(&b.match_date));
        for m in warm {
            tracker.record(m);
        }
        let mut prepared = Vec::with_capacity(sorted.len());
        let mut skipped = Vec::new();
        for m in sorted {
            let Some(outcome) = m.outcome() else {
                skipped.push(SkippedMatch {
                    fixture: m.label(),
                    reason: "no recorded result".to_string(),
                });
                continue;
            };
            prepared.push(Prepared {
                m,
                outcome,
                home: tracker.team_stats(&m.home_team, m.match_date),
                away: tracker.team_stats(&m.away_team, m.match_date),
                ctx: tracker.match_context(&m.home_team, &m.away_team, m.match_date),
            });
            tracker.record(m);
        }
        (prepared, skipped)
    }

    fn predict_corpus(&self, corpus: &[HistoricalMatch], artifact: &ModelArtifact) -> Predictions {
        let (prepared, mut skipped) = self.prepare(corpus);
        let mut scored = Vec::with_capacity(prepared.len());
        let mut completed = true;

        for chunk in prepared.chunks(CHUNK) {
            if self.cancelled() {
                completed = false;
                break;
            }
            let results: Vec<Result<Scored, SkippedMatch>> = chunk
                .par_iter()
                .map(|p| {
                    predict_match(
                        artifact,
                        &self.config.calibrator,
                        &p.home,
                        &p.away,
                        &p.ctx,
                        p.m.odds.as_ref(),
                    )
                    .map(|pred| Scored {
                        fixture: p.m.label(),
                        actual: p.outcome,
                        dist: pred.raw.probabilities,
                        odds: p.m.odds,
                    })
                    .map_err(|err| SkippedMatch {
                        fixture: p.m.label(),
                        reason: err.to_string(),
                    })
                })
                .collect();
            for r in results {
                match r {
                    Ok(s) => scored.push(s),
                    Err(skip) => {
                        warn!(
                            fixture = %skip.fixture,
                            reason = %skip.reason,
                            "backtest match skipped"
                        );
                        skipped.push(skip);
                    }
                }
            }
        }

        if !completed {
            warn!(
                processed = scored.len(),
                total = corpus.len(),
                "backtest cancelled, partial report"
            );
        }
        Predictions {
            total: corpus.len(),
            scored,
            skipped,
            completed,
        }
    }

    fn settle(
        &self,
        preds: &Predictions,
        model_id: &str,
        provenance: Provenance,
        threshold: f64,
    ) -> BacktestRun {
        let stake = self.config.stake;
        let mut bets = Vec::new();
        let mut passed = 0usize;
        let mut unpriced = 0usize;

        for s in &preds.scored {
            let decision = evaluate(&s.dist, s.odds.as_ref(), threshold);
            if !decision.pass_filter {
                continue;
            }
            passed += 1;
            let (Some(odds), Some(edge)) = (decision.odds_taken, decision.edge_pct) else {
                unpriced += 1;
                continue;
            };
            let won = decision.prediction.wins(s.actual);
            bets.push(BetRecord {
                fixture: s.fixture.clone(),
                prediction: decision.prediction,
                actual: s.actual,
                confidence: decision.confidence,
                odds,
                edge_pct: edge,
                won,
                profit: if won { stake * (odds - 1.0) } else { -stake },
            });
        }

        let dists: Vec<OutcomeDist> = preds.scored.iter().map(|s| s.dist.clone()).collect();
        let actuals: Vec<Outcome> = preds.scored.iter().map(|s| s.actual).collect();
        let metrics = evaluate_probs(&dists, &actuals);

        let wins = bets.iter().filter(|b| b.won).count();
        let n = bets.len();
        let total_profit: f64 = bets.iter().map(|b| b.profit).sum();
        let total_staked = stake * n as f64;
        let avg_odds_taken = if n > 0 {
            bets.iter().map(|b| b.odds).sum::<f64>() / n as f64
        } else {
            0.0
        };
        let avg_winning_odds = if wins > 0 {
            bets.iter().filter(|b| b.won).map(|b| b.odds).sum::<f64>() / wins as f64
        } else {
            0.0
        };

        let run = BacktestRun {
            model_id: model_id.to_string(),
            threshold,
            stake,
            live_validated: provenance.is_live_validated(),
            provenance,
            completed: preds.completed,
            total_matches: preds.total,
            evaluated: preds.scored.len(),
            passed_filter: passed,
            unpriced,
            bets_placed: n,
            wins,
            losses: n - wins,
            win_rate: if n > 0 { wins as f64 / n as f64 } else { 0.0 },
            total_staked,
            total_profit,
            roi: if total_staked > 0.0 { total_profit / total_staked } else { 0.0 },
            avg_odds_taken,
            avg_winning_odds,
            break_even_rate: if n > 0 { break_even_rate(avg_odds_taken) } else { 0.0 },
            metrics,
            skipped: preds.skipped.clone(),
            bets,
        };
        info!(
            model = %run.model_id,
            threshold,
            bets = run.bets_placed,
            win_rate = run.win_rate,
            roi = run.roi,
            "backtest settled"
        );
        run
    }
}
