use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::{CalibrationBin, DriftReport, calibration_bins, drift_check};
use crate::error::{LedgerError, SettlementConflictError};
use crate::ledger_store::LedgerStore;
use crate::outcome::Outcome;
use crate::pick::{Pick, PickKey, Settlement};
use crate::providers::{MatchResult, ResultsProvider};

#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Settled(Pick),
    /// Same result delivered again; nothing changed.
    AlreadySettled(Pick),
}

impl SettleOutcome {
    pub fn pick(&self) -> &Pick {
        match self {
            SettleOutcome::Settled(p) | SettleOutcome::AlreadySettled(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SettleOutcome::Settled(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub total_bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_staked: f64,
    pub total_profit: f64,
    pub roi: f64,
    /// Positive for a run of wins, negative for a run of losses.
    pub streak: i64,
    pub settled_picks: usize,
    pub correct_picks: usize,
    pub accuracy: f64,
    pub pending: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub settled: usize,
    pub already_settled: usize,
    /// Results with no emitted pick.
    pub unmatched: usize,
    pub conflicts: Vec<SettlementConflictError>,
}

pub struct Ledger {
    picks: BTreeMap<PickKey, Pick>,
    store: Option<LedgerStore>,
    flat_stake: f64,
}

impl Ledger {
    pub fn new(flat_stake: f64) -> Self {
        Self {
            picks: BTreeMap::new(),
            store: None,
            flat_stake: flat_stake.max(0.0),
        }
    }

    /// Loads every pick already persisted in `store` and writes through to it
    /// afterwards.
    pub fn with_store(store: LedgerStore, flat_stake: f64) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(flat_stake);
        for pick in store.load_all()? {
            ledger.picks.insert(pick.key.clone(), pick);
        }
        info!(picks = ledger.picks.len(), "ledger loaded");
        ledger.store = Some(store);
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.picks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    pub fn get(&self, key: &PickKey) -> Option<&Pick> {
        self.picks.get(key)
    }

    pub fn picks(&self) -> impl Iterator<Item = &Pick> {
        self.picks.values()
    }

    pub fn pending(&self) -> Vec<&Pick> {
        self.picks.values().filter(|p| !p.is_settled()).collect()
    }

    /// Records an emitted pick. The first pick emitted for a key wins; later
    /// emissions for the same match are ignored.
    pub fn record(&mut self, pick: Pick) -> Result<bool, LedgerError> {
        if self.picks.contains_key(&pick.key) {
            return Ok(false);
        }
        if let Some(store) = &self.store {
            store.upsert(&pick)?;
        }
        self.picks.insert(pick.key.clone(), pick);
        Ok(true)
    }

    pub fn record_all(
        &mut self,
        picks: impl IntoIterator<Item = Pick>,
    ) -> Result<usize, LedgerError> {
        let mut added = 0;
        for pick in picks {
            if self.record(pick)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Settles a previously emitted pick against the real outcome, pricing it
    /// with the odds recorded when it was emitted.
    pub fn settle(
        &mut self,
        key: &PickKey,
        actual: Outcome,
        score: Option<(u32, u32)>,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, LedgerError> {
        let flat_stake = self.flat_stake;
        let Some(pick) = self.picks.get_mut(key) else {
            return Err(LedgerError::UnknownPick(key.to_string()));
        };

        if let Some(existing) = &pick.settlement {
            let score_differs = matches!(
                (existing.home_goals.zip(existing.away_goals), score),
                (Some(a), Some(b)) if a != b
            );
            if existing.actual != actual || score_differs {
                return Err(SettlementConflictError {
                    key: key.to_string(),
                    recorded: describe(
                        existing.actual,
                        existing.home_goals.zip(existing.away_goals),
                    ),
                    attempted: describe(actual, score),
                }
                .into());
            }
            return Ok(SettleOutcome::AlreadySettled(pick.clone()));
        }

        let correct = pick.prediction.wins(actual);
        let (stake, profit) = match pick.odds_taken {
            Some(odds) if pick.pass_filter => {
                let stake = pick.suggested_stake.unwrap_or(flat_stake);
                (stake, if correct { stake * (odds - 1.0) } else { -stake })
            }
            _ => (0.0, 0.0),
        };
        let mut settled = pick.clone();
        settled.settlement = Some(Settlement {
            actual,
            home_goals: score.map(|s| s.0),
            away_goals: score.map(|s| s.1),
            correct,
            stake,
            profit,
            settled_at: now,
        });
        // The in-memory copy only changes once the store has the settlement.
        if let Some(store) = &self.store {
            store.upsert(&settled)?;
        }
        *pick = settled.clone();
        info!(key = %key, actual = %actual, correct, profit, "pick settled");
        Ok(SettleOutcome::Settled(settled))
    }

    /// Settles `pick`, recording it first if the ledger has not seen it. A
    /// pick whose recorded price differs from the ledger's copy is a conflict.
    pub fn settle_pick(
        &mut self,
        pick: &Pick,
        actual: Outcome,
        now: DateTime<Utc>,
    ) -> Result<SettleOutcome, LedgerError> {
        match self.picks.get(&pick.key) {
            Some(recorded) if recorded.odds_taken != pick.odds_taken => {
                return Err(SettlementConflictError {
                    key: pick.key.to_string(),
                    recorded: format!("odds {}", fmt_odds(recorded.odds_taken)),
                    attempted: format!("odds {}", fmt_odds(pick.odds_taken)),
                }
                .into());
            }
            Some(_) => {}
            None => {
                self.record(pick.clone())?;
            }
        }
        self.settle(&pick.key, actual, None, now)
    }

    /// Applies a batch of results. Conflicts are collected for manual review
    /// rather than aborting the batch.
    pub fn reconcile(
        &mut self,
        results: &[MatchResult],
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport::default();
        for r in results {
            let key = r.key();
            match self.settle(&key, r.outcome(), Some((r.home_goals, r.away_goals)), now) {
                Ok(SettleOutcome::Settled(_)) => report.settled += 1,
                Ok(SettleOutcome::AlreadySettled(_)) => report.already_settled += 1,
                Err(LedgerError::UnknownPick(_)) => report.unmatched += 1,
                Err(LedgerError::Conflict(conflict)) => {
                    warn!(%conflict, "settlement conflict needs review");
                    report.conflicts.push(conflict);
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            settled = report.settled,
            duplicates = report.already_settled,
            unmatched = report.unmatched,
            conflicts = report.conflicts.len(),
            "results reconciled"
        );
        Ok(report)
    }

    /// Pulls results from the provider starting at the oldest pending match.
    pub fn reconcile_from(
        &mut self,
        provider: &dyn ResultsProvider,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, LedgerError> {
        let since = self.pending().iter().map(|p| p.key.match_date).min();
        if since.is_none() {
            return Ok(ReconcileReport::default());
        }
        let results = provider.results(since)?;
        self.reconcile(&results, now)
    }

    /// Settled picks in (match date, key) order.
    fn settled_history(&self) -> impl Iterator<Item = (&Pick, &Settlement)> {
        self.picks
            .values()
            .filter_map(|p| p.settlement.as_ref().map(|s| (p, s)))
    }

    /// Recomputed from the full settled history on every call.
    pub fn running_stats(&self) -> RunningStats {
        let mut stats = RunningStats {
            pending: self.picks.values().filter(|p| !p.is_settled()).count(),
            ..RunningStats::default()
        };
        for (pick, s) in self.settled_history() {
            stats.settled_picks += 1;
            if s.correct {
                stats.correct_picks += 1;
            }
            if !(pick.is_bet() && s.stake > 0.0) {
                continue;
            }
            stats.total_bets += 1;
            stats.total_staked += s.stake;
            stats.total_profit += s.profit;
            if s.correct {
                stats.wins += 1;
                stats.streak = if stats.streak > 0 { stats.streak + 1 } else { 1 };
            } else {
                stats.losses += 1;
                stats.streak = if stats.streak < 0 { stats.streak - 1 } else { -1 };
            }
        }
        if stats.total_bets > 0 {
            stats.win_rate = stats.wins as f64 / stats.total_bets as f64;
        }
        if stats.total_staked > 0.0 {
            stats.roi = stats.total_profit / stats.total_staked;
        }
        if stats.settled_picks > 0 {
            stats.accuracy = stats.correct_picks as f64 / stats.settled_picks as f64;
        }
        stats
    }

    /// Reliability of stated confidence over every settled pick.
    pub fn reliability(&self, bins: usize) -> Vec<CalibrationBin> {
        let samples: Vec<(f64, bool)> = self
            .settled_history()
            .map(|(p, s)| (p.confidence, s.correct))
            .collect();
        calibration_bins(&samples, bins)
    }

    pub fn drift(&self, window: usize, floor: f64) -> DriftReport {
        let hits: Vec<bool> = self.settled_history().map(|(_, s)| s.correct).collect();
        drift_check(&hits, window, floor)
    }
}

fn describe(actual: Outcome, score: Option<(u32, u32)>) -> String {
    match score {
        Some((h, a)) => format!("{actual} {h}-{a}"),
        None => actual.to_string(),
    }
}

fn fmt_odds(odds: Option<f64>) -> String {
    odds.map(|o| format!("{o:.2}")).unwrap_or_else(|| "none".to_string())
}
