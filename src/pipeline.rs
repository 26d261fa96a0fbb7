use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{LiveModel, ModelArtifact};
use crate::calibration::{Calibrated, Calibrator};
use crate::edge::{BankrollConfig, PickInput, build_pick};
use crate::ensemble;
use crate::error::PipelineError;
use crate::features::{MatchContext, TeamStats, vectorize};
use crate::market::MarketOdds;
use crate::pick::{Pick, RawPrediction};
use crate::providers::{Fixture, OddsProvider, StatsProvider};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickSettings {
    pub calibrator: Calibrator,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub raw: RawPrediction,
    pub calibrated: Calibrated,
}

/// Vectorize, score, calibrate. Fails only for this match.
pub fn predict_match(
    artifact: &ModelArtifact,
    calibrator: &Calibrator,
    home: &TeamStats,
    away: &TeamStats,
    ctx: &MatchContext,
    odds: Option<&MarketOdds>,
) -> Result<Prediction, PipelineError> {
    let vectorized = vectorize(home, away, ctx, &artifact.manifest)?;
    let ensemble = ensemble::predict(&vectorized.vector, artifact)?;
    let calibrated = calibrator.calibrate(&ensemble.dist, odds);
    let (prediction, confidence) = calibrated.dist.argmax();
    Ok(Prediction {
        raw: RawPrediction {
            prediction,
            confidence,
            probabilities: calibrated.dist.clone(),
            vector: vectorized.vector,
            imputed: vectorized.imputed,
            model_id: artifact.id.clone(),
            market_anchored: calibrated.is_market_anchored(),
            dropped_members: ensemble.failures.into_iter().map(|f| f.member).collect(),
        },
        calibrated,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFixture {
    pub fixture: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum PickBatch {
    /// No validated artifact is loaded; nothing is predicted.
    Unavailable { reason: String },
    Ready {
        model_id: String,
        picks: Vec<Pick>,
        skipped: Vec<SkippedFixture>,
    },
}

impl PickBatch {
    pub fn picks(&self) -> &[Pick] {
        match self {
            PickBatch::Ready { picks, .. } => picks,
            PickBatch::Unavailable { .. } => &[],
        }
    }

    /// Picks that cleared the confidence bar and carry a price.
    pub fn bet_now(&self) -> Vec<&Pick> {
        self.picks().iter().filter(|p| p.is_bet()).collect()
    }
}

pub fn generate_picks(
    live: &LiveModel,
    fixtures: &[Fixture],
    stats: &dyn StatsProvider,
    odds: &dyn OddsProvider,
    settings: &PickSettings,
    bankroll: &BankrollConfig,
    now: DateTime<Utc>,
) -> PickBatch {
    let Some(artifact) = live.current() else {
        warn!("generate_picks called without a live model");
        return PickBatch::Unavailable {
            reason: "no live model artifact loaded".to_string(),
        };
    };

    let results: Vec<Result<Pick, SkippedFixture>> = fixtures
        .par_iter()
        .map(|fixture| {
            let home = stats
                .team_stats(&fixture.home_team, fixture.match_date)
                .unwrap_or_else(|| TeamStats::unknown(&fixture.home_team));
            let away = stats
                .team_stats(&fixture.away_team, fixture.match_date)
                .unwrap_or_else(|| TeamStats::unknown(&fixture.away_team));
            let ctx = stats.match_context(fixture);
            let quote = odds.odds(fixture);
            predict_match(&artifact, &settings.calibrator, &home, &away, &ctx, quote.as_ref())
                .map(|pred| {
                    build_pick(
                        pred.raw,
                        PickInput {
                            home_team: &fixture.home_team,
                            away_team: &fixture.away_team,
                            match_date: fixture.match_date,
                            odds: quote,
                            created_at: now,
                        },
                        settings.confidence_threshold,
                        Some(bankroll),
                    )
                })
                .map_err(|err| SkippedFixture {
                    fixture: fixture.label(),
                    reason: err.to_string(),
                })
        })
        .collect();

    let mut picks = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for r in results {
        match r {
            Ok(pick) => picks.push(pick),
            Err(skip) => {
                warn!(fixture = %skip.fixture, reason = %skip.reason, "fixture skipped");
                skipped.push(skip);
            }
        }
    }
    info!(
        model = %artifact.id,
        picks = picks.len(),
        passing = picks.iter().filter(|p| p.pass_filter).count(),
        skipped = skipped.len(),
        "picks generated"
    );
    PickBatch::Ready {
        model_id: artifact.id.clone(),
        picks,
        skipped,
    }
}
