use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::market::{MarketOdds, implied_prob};
use crate::outcome::{OutcomeDist, Selection};
use crate::pick::{Pick, PickKey, RawPrediction};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BankrollConfig {
    pub bankroll: f64,
    pub stake_fraction: f64,
}

impl Default for BankrollConfig {
    fn default() -> Self {
        Self {
            bankroll: 10_000.0,
            stake_fraction: 0.015,
        }
    }
}

impl BankrollConfig {
    pub fn stake(&self) -> f64 {
        (self.bankroll * self.stake_fraction).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeDecision {
    pub prediction: Selection,
    pub confidence: f64,
    pub odds_taken: Option<f64>,
    /// Raw `1 / odds`, margin included.
    pub market_implied: Option<f64>,
    /// Percentage points; negative when the market rates the pick higher.
    pub edge_pct: Option<f64>,
    pub pass_filter: bool,
}

impl EdgeDecision {
    pub fn expected_value(&self) -> Option<f64> {
        self.odds_taken.map(|o| self.confidence * o - 1.0)
    }
}

pub fn edge_pct(probability: f64, decimal_odds: f64) -> f64 {
    (probability - implied_prob(decimal_odds)) * 100.0
}

/// Win rate needed to break even at the given decimal price.
pub fn break_even_rate(decimal_odds: f64) -> f64 {
    implied_prob(decimal_odds)
}

pub fn evaluate(
    calibrated: &OutcomeDist,
    market: Option<&MarketOdds>,
    confidence_threshold: f64,
) -> EdgeDecision {
    let (prediction, confidence) = calibrated.argmax();
    let odds_taken = market
        .map(|m| m.odds_for(prediction))
        .filter(|o| o.is_finite() && *o > 1.0);
    let market_implied = odds_taken.map(implied_prob);
    EdgeDecision {
        prediction,
        confidence,
        odds_taken,
        market_implied,
        edge_pct: market_implied.map(|imp| (confidence - imp) * 100.0),
        pass_filter: confidence >= confidence_threshold,
    }
}

pub struct PickInput<'a> {
    pub home_team: &'a str,
    pub away_team: &'a str,
    pub match_date: NaiveDate,
    pub odds: Option<MarketOdds>,
    pub created_at: DateTime<Utc>,
}

pub fn build_pick(
    raw: RawPrediction,
    input: PickInput<'_>,
    confidence_threshold: f64,
    bankroll: Option<&BankrollConfig>,
) -> Pick {
    let decision = evaluate(&raw.probabilities, input.odds.as_ref(), confidence_threshold);
    let suggested_stake = match bankroll {
        Some(b) if decision.pass_filter && decision.odds_taken.is_some() => Some(b.stake()),
        _ => None,
    };
    Pick {
        key: PickKey::new(input.home_team, input.away_team, input.match_date),
        home_team: input.home_team.to_string(),
        away_team: input.away_team.to_string(),
        model_id: raw.model_id,
        prediction: decision.prediction,
        confidence: decision.confidence,
        probabilities: raw.probabilities,
        odds: input.odds,
        odds_taken: decision.odds_taken,
        market_implied: decision.market_implied,
        edge_pct: decision.edge_pct,
        threshold: confidence_threshold,
        pass_filter: decision.pass_filter,
        suggested_stake,
        imputed: raw.imputed,
        created_at: input.created_at,
        settlement: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{BankrollConfig, break_even_rate, edge_pct, evaluate};
    use crate::market::MarketOdds;
    use crate::outcome::{ClassSet, OutcomeDist, Selection};

    #[test]
    fn negative_edge_is_reported_not_rejected() {
        let d = OutcomeDist::new(ClassSet::ThreeWay, vec![0.45, 0.30, 0.25]).unwrap();
        let out = evaluate(&d, Some(&MarketOdds::new(1.80, 3.6, 4.5)), 0.40);
        assert_eq!(out.prediction, Selection::HomeWin);
        assert!(out.edge_pct.unwrap() < 0.0);
        assert!(out.pass_filter);
        assert!(out.expected_value().unwrap() < 0.0);
    }

    #[test]
    fn no_market_means_no_edge() {
        let d = OutcomeDist::new(ClassSet::HomeVsField, vec![0.3, 0.7]).unwrap();
        let out = evaluate(&d, None, 0.6);
        assert!(out.edge_pct.is_none());
        assert!(out.odds_taken.is_none());
        assert!(out.pass_filter);
    }

    #[test]
    fn helpers() {
        assert!((edge_pct(0.6, 2.0) - 10.0).abs() < 1e-9);
        assert!((break_even_rate(1.85) - 0.5405).abs() < 1e-3);
        assert!((BankrollConfig::default().stake() - 150.0).abs() < 1e-9);
    }
}
