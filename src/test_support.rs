use chrono::{NaiveDate, Utc};

use crate::artifact::{ArtifactMember, ModelArtifact, Standardizer};
use crate::ensemble::{ClassPrior, ClassifierModel};
use crate::features::DEFAULT_MANIFEST;
use crate::history::HistoricalMatch;
use crate::market::MarketOdds;
use crate::outcome::{ClassSet, OutcomeDist, Selection};
use crate::pick::{Pick, PickKey};

/// Artifact over the default manifest whose single member always returns
/// `probs`.
pub fn prior_artifact(probs: &[f64]) -> ModelArtifact {
    let manifest = DEFAULT_MANIFEST.clone();
    let width = manifest.len();
    ModelArtifact::assemble(
        ClassSet::from_len(probs.len()).unwrap_or(ClassSet::ThreeWay),
        manifest,
        Standardizer::identity(width),
        vec![ArtifactMember {
            name: "prior".to_string(),
            model: ClassifierModel::Prior(ClassPrior {
                n_features: width,
                probs: probs.to_vec(),
            }),
        }],
        None,
        None,
        Utc::now(),
    )
    .unwrap()
}

pub fn played(
    home: &str,
    away: &str,
    date: NaiveDate,
    goals: (u32, u32),
    odds: Option<MarketOdds>,
) -> HistoricalMatch {
    HistoricalMatch {
        league: "T".to_string(),
        season: "1".to_string(),
        match_date: date,
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_goals: Some(goals.0),
        away_goals: Some(goals.1),
        odds,
        source: "football-data:T".to_string(),
        synthetic: false,
    }
}

/// Home-win pick on 2026-02-`day`.
pub fn pick(home: &str, away: &str, day: u32, odds: Option<f64>, pass: bool) -> Pick {
    let date = NaiveDate::from_ymd_opt(2026, 2, day).unwrap();
    Pick {
        key: PickKey::new(home, away, date),
        home_team: home.to_string(),
        away_team: away.to_string(),
        model_id: "m".to_string(),
        prediction: Selection::HomeWin,
        confidence: 0.62,
        probabilities: OutcomeDist::new(ClassSet::ThreeWay, vec![0.62, 0.2, 0.18]).unwrap(),
        odds: None,
        odds_taken: odds,
        market_implied: odds.map(|o| 1.0 / o),
        edge_pct: None,
        threshold: 0.6,
        pass_filter: pass,
        suggested_stake: None,
        imputed: Vec::new(),
        created_at: Utc::now(),
        settlement: None,
    }
}
