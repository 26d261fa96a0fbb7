use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::features::{MatchContext, TeamStats};
use crate::history::HistoricalMatch;
use crate::market::MarketOdds;
use crate::outcome::{Outcome, classify_outcome};
use crate::pick::PickKey;
use crate::team_form::FormTracker;

/// A scheduled match as handed over by the fixtures collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub home_team: String,
    pub away_team: String,
    pub match_date: NaiveDate,
    #[serde(default)]
    pub odds: Option<MarketOdds>,
    #[serde(default)]
    pub travel_km: Option<f64>,
    #[serde(default)]
    pub is_derby: bool,
}

impl Fixture {
    pub fn key(&self) -> PickKey {
        PickKey::new(&self.home_team, &self.away_team, self.match_date)
    }

    pub fn label(&self) -> String {
        format!("{} vs {} ({})", self.home_team, self.away_team, self.match_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub home_team: String,
    pub away_team: String,
    pub match_date: NaiveDate,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl MatchResult {
    pub fn outcome(&self) -> Outcome {
        classify_outcome(self.home_goals as i32, self.away_goals as i32)
    }

    pub fn key(&self) -> PickKey {
        PickKey::new(&self.home_team, &self.away_team, self.match_date)
    }
}

pub trait StatsProvider: Sync {
    fn team_stats(&self, team: &str, as_of: NaiveDate) -> Option<TeamStats>;
    fn match_context(&self, fixture: &Fixture) -> MatchContext;
}

pub trait OddsProvider: Sync {
    fn odds(&self, fixture: &Fixture) -> Option<MarketOdds>;
}

pub trait ResultsProvider {
    fn results(&self, since: Option<NaiveDate>) -> Result<Vec<MatchResult>>;
}

impl StatsProvider for FormTracker {
    fn team_stats(&self, team: &str, as_of: NaiveDate) -> Option<TeamStats> {
        Some(FormTracker::team_stats(self, team, as_of))
    }

    fn match_context(&self, fixture: &Fixture) -> MatchContext {
        let mut ctx = FormTracker::match_context(
            self,
            &fixture.home_team,
            &fixture.away_team,
            fixture.match_date,
        );
        ctx.travel_km = fixture.travel_km;
        ctx.is_derby = fixture.is_derby;
        ctx
    }
}

/// Prices attached to the fixture feed itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineOdds;

impl OddsProvider for InlineOdds {
    fn odds(&self, fixture: &Fixture) -> Option<MarketOdds> {
        fixture.odds
    }
}

/// Finished matches already in the history store, served as results.
#[derive(Debug, Clone)]
pub struct HistoryResults {
    matches: Vec<HistoricalMatch>,
}

impl HistoryResults {
    pub fn new(matches: Vec<HistoricalMatch>) -> Self {
        Self { matches }
    }
}

impl ResultsProvider for HistoryResults {
    fn results(&self, since: Option<NaiveDate>) -> Result<Vec<MatchResult>> {
        Ok(self
            .matches
            .iter()
            .filter(|m| since.is_none_or(|d| m.match_date >= d))
            .filter_map(|m| {
                Some(MatchResult {
                    home_team: m.home_team.clone(),
                    away_team: m.away_team.clone(),
                    match_date: m.match_date,
                    home_goals: m.home_goals?,
                    away_goals: m.away_goals?,
                })
            })
            .collect())
    }
}

/// Results dropped as a JSON array by the results collaborator.
#[derive(Debug, Clone)]
pub struct JsonResults {
    path: std::path::PathBuf,
}

impl JsonResults {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultsProvider for JsonResults {
    fn results(&self, since: Option<NaiveDate>) -> Result<Vec<MatchResult>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read results {}", self.path.display()))?;
        let rows: Vec<MatchResult> = serde_json::from_str(&raw)
            .with_context(|| format!("parse results {}", self.path.display()))?;
        Ok(rows
            .into_iter()
            .filter(|r| since.is_none_or(|d| r.match_date >= d))
            .collect())
    }
}

pub fn load_fixtures_json(path: &Path) -> Result<Vec<Fixture>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read fixtures {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse fixtures {}", path.display()))
}
