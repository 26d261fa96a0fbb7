use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;
use crate::market::MarketOdds;
use crate::outcome::{Outcome, OutcomeDist, Selection};

/// Lowercase, alphanumerics only: "Man-City " and "man city" collide.
pub fn normalize_team(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PickKey {
    pub match_date: NaiveDate,
    pub home: String,
    pub away: String,
}

impl PickKey {
    pub fn new(home: &str, away: &str, match_date: NaiveDate) -> Self {
        Self {
            match_date,
            home: normalize_team(home),
            away: normalize_team(away),
        }
    }
}

impl fmt::Display for PickKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.home, self.away, self.match_date)
    }
}

/// Ensemble output after calibration, before any market comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub prediction: Selection,
    pub confidence: f64,
    pub probabilities: OutcomeDist,
    pub vector: FeatureVector,
    pub imputed: Vec<String>,
    pub model_id: String,
    pub market_anchored: bool,
    pub dropped_members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub actual: Outcome,
    #[serde(default)]
    pub home_goals: Option<u32>,
    #[serde(default)]
    pub away_goals: Option<u32>,
    pub correct: bool,
    pub stake: f64,
    pub profit: f64,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub key: PickKey,
    pub home_team: String,
    pub away_team: String,
    pub model_id: String,
    pub prediction: Selection,
    pub confidence: f64,
    pub probabilities: OutcomeDist,
    #[serde(default)]
    pub odds: Option<MarketOdds>,
    /// Decimal price of the predicted selection when the pick was made.
    #[serde(default)]
    pub odds_taken: Option<f64>,
    #[serde(default)]
    pub market_implied: Option<f64>,
    #[serde(default)]
    pub edge_pct: Option<f64>,
    pub threshold: f64,
    pub pass_filter: bool,
    #[serde(default)]
    pub suggested_stake: Option<f64>,
    #[serde(default)]
    pub imputed: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub settlement: Option<Settlement>,
}

impl Pick {
    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }

    pub fn is_bet(&self) -> bool {
        self.pass_filter && self.odds_taken.is_some()
    }

    pub fn match_label(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{PickKey, normalize_team};

    #[test]
    fn key_ignores_case_and_punctuation() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 21).unwrap();
        assert_eq!(PickKey::new("Team A", "Team-B", d), PickKey::new("team a", "TEAMB", d));
        assert_ne!(PickKey::new("Team A", "Team B", d), PickKey::new("Team B", "Team A", d));
        assert_eq!(PickKey::new("Team A", "Team B", d).to_string(), "teama|teamb|2026-02-21");
        assert_eq!(normalize_team(" Brighton & Hove Albion "), "brightonhovealbion");
    }
}
