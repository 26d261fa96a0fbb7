use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PipelineError;

pub const DEFAULT_MANIFEST_VERSION: &str = "kicklab-v1";

const FEATURE_NAMES: [&str; 26] = [
    "home_form_ppg",
    "away_form_ppg",
    "form_ppg_diff",
    "home_goals_for_pg",
    "home_goals_against_pg",
    "away_goals_for_pg",
    "away_goals_against_pg",
    "home_goal_diff_pg",
    "away_goal_diff_pg",
    "home_venue_win_rate",
    "away_venue_win_rate",
    "home_venue_goals_for",
    "away_venue_goals_for",
    "home_momentum",
    "away_momentum",
    "position_diff",
    "home_rest_days",
    "away_rest_days",
    "rest_diff",
    "travel_km",
    "away_travel_fatigue",
    "home_motivation",
    "away_motivation",
    "is_derby",
    "h2h_home_win_rate",
    "elo_diff",
];

pub static DEFAULT_MANIFEST: Lazy<FeatureManifest> = Lazy::new(|| {
    FeatureManifest::new(
        DEFAULT_MANIFEST_VERSION,
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
    )
});

pub fn known_features() -> &'static [&'static str] {
    &FEATURE_NAMES
}

/// Ordered, versioned list of feature names. Fixes vector length and the
/// meaning of every position for one model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureManifest {
    pub version: String,
    pub names: Vec<String>,
}

impl FeatureManifest {
    pub fn new(version: &str, names: Vec<String>) -> Self {
        Self {
            version: version.to_string(),
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        for name in &self.names {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.names.is_empty() {
            return Err(PipelineError::feature_mismatch(&self.version, "manifest is empty"));
        }
        let mut seen = HashSet::new();
        for name in &self.names {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                return Err(PipelineError::feature_mismatch(
                    &self.version,
                    format!("vectorizer cannot produce feature `{name}`"),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::feature_mismatch(
                    &self.version,
                    format!("feature `{name}` listed twice"),
                ));
            }
        }
        Ok(())
    }
}

/// Per-team aggregates as of the match date. Every field is optional because
/// upstream coverage is not guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team: String,
    #[serde(default)]
    pub matches_played: Option<u32>,
    #[serde(default)]
    pub form_ppg: Option<f64>,
    #[serde(default)]
    pub season_ppg: Option<f64>,
    #[serde(default)]
    pub goals_for_pg: Option<f64>,
    #[serde(default)]
    pub goals_against_pg: Option<f64>,
    #[serde(default)]
    pub home_win_rate: Option<f64>,
    #[serde(default)]
    pub away_win_rate: Option<f64>,
    #[serde(default)]
    pub home_goals_for_pg: Option<f64>,
    #[serde(default)]
    pub away_goals_for_pg: Option<f64>,
    #[serde(default)]
    pub league_position: Option<u32>,
    #[serde(default)]
    pub rest_days: Option<f64>,
    #[serde(default)]
    pub elo: Option<f64>,
    #[serde(default)]
    pub motivation: Option<f64>,
}

impl TeamStats {
    pub fn unknown(team: &str) -> Self {
        Self {
            team: team.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeagueAverages {
    pub form_ppg: f64,
    pub season_ppg: f64,
    pub goals_for_pg: f64,
    pub goals_against_pg: f64,
    pub home_win_rate: f64,
    pub away_win_rate: f64,
    pub home_goals_for_pg: f64,
    pub away_goals_for_pg: f64,
    pub league_position: f64,
    pub league_size: u32,
    pub rest_days: f64,
    pub travel_km: f64,
    pub elo: f64,
    pub h2h_home_win_rate: f64,
}

impl Default for LeagueAverages {
    fn default() -> Self {
        Self {
            form_ppg: 1.5,
            season_ppg: 1.5,
            goals_for_pg: 1.5,
            goals_against_pg: 1.5,
            home_win_rate: 0.5,
            away_win_rate: 0.3,
            home_goals_for_pg: 1.7,
            away_goals_for_pg: 1.3,
            league_position: 10.0,
            league_size: 20,
            rest_days: 7.0,
            travel_km: 240.0,
            elo: 1500.0,
            h2h_home_win_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    pub match_date: NaiveDate,
    #[serde(default)]
    pub travel_km: Option<f64>,
    #[serde(default)]
    pub is_derby: bool,
    #[serde(default)]
    pub h2h_home_win_rate: Option<f64>,
}

impl MatchContext {
    pub fn on(match_date: NaiveDate) -> Self {
        Self {
            match_date,
            travel_km: None,
            is_derby: false,
            h2h_home_win_rate: None,
        }
    }
}

/// Immutable numeric input for one prediction, tied to the manifest that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
    manifest_fingerprint: String,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn manifest_fingerprint(&self) -> &str {
        &self.manifest_fingerprint
    }

    pub fn ensure_matches(&self, manifest: &FeatureManifest) -> Result<(), PipelineError> {
        if self.manifest_fingerprint != manifest.fingerprint() {
            return Err(PipelineError::feature_mismatch(
                &manifest.version,
                format!(
                    "vector built for manifest {} but artifact expects {}",
                    self.manifest_fingerprint,
                    manifest.fingerprint()
                ),
            ));
        }
        if self.values.len() != manifest.len() {
            return Err(PipelineError::feature_mismatch(
                &manifest.version,
                format!(
                    "vector has {} values, manifest lists {}",
                    self.values.len(),
                    manifest.len()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vectorized {
    pub vector: FeatureVector,
    /// Inputs replaced by league-average defaults, e.g. `home.form_ppg`.
    pub imputed: Vec<String>,
}

impl Vectorized {
    pub fn is_fully_observed(&self) -> bool {
        self.imputed.is_empty()
    }
}

struct Resolved {
    home_form: f64,
    away_form: f64,
    home_season: f64,
    away_season: f64,
    home_gf: f64,
    home_ga: f64,
    away_gf: f64,
    away_ga: f64,
    home_venue_wr: f64,
    away_venue_wr: f64,
    home_venue_gf: f64,
    away_venue_gf: f64,
    home_pos: f64,
    away_pos: f64,
    home_rest: f64,
    away_rest: f64,
    travel_km: f64,
    home_motivation: f64,
    away_motivation: f64,
    is_derby: f64,
    h2h: f64,
    home_elo: f64,
    away_elo: f64,
}

struct Imputer {
    imputed: Vec<String>,
}

impl Imputer {
    fn take(&mut self, value: Option<f64>, default: f64, field: &str) -> f64 {
        match value {
            Some(v) if v.is_finite() => v,
            _ => {
                self.imputed.push(field.to_string());
                default
            }
        }
    }
}

pub fn vectorize(
    home: &TeamStats,
    away: &TeamStats,
    ctx: &MatchContext,
    manifest: &FeatureManifest,
) -> Result<Vectorized, PipelineError> {
    vectorize_with(home, away, ctx, manifest, &LeagueAverages::default())
}

pub fn vectorize_with(
    home: &TeamStats,
    away: &TeamStats,
    ctx: &MatchContext,
    manifest: &FeatureManifest,
    avg: &LeagueAverages,
) -> Result<Vectorized, PipelineError> {
    manifest.validate()?;

    let mut imp = Imputer {
        imputed: Vec::new(),
    };
    let resolved = resolve(home, away, ctx, avg, &mut imp);

    let mut values = Vec::with_capacity(manifest.len());
    for name in &manifest.names {
        let Some(value) = feature_value(name, &resolved) else {
            return Err(PipelineError::feature_mismatch(
                &manifest.version,
                format!("vectorizer cannot produce feature `{name}`"),
            ));
        };
        if !value.is_finite() {
            return Err(PipelineError::feature_mismatch(
                &manifest.version,
                format!("feature `{name}` evaluated to {value}"),
            ));
        }
        values.push(value);
    }

    if values.len() != manifest.len() {
        return Err(PipelineError::feature_mismatch(
            &manifest.version,
            format!("built {} values for {} names", values.len(), manifest.len()),
        ));
    }

    if !imp.imputed.is_empty() {
        debug!(
            home = %home.team,
            away = %away.team,
            imputed = ?imp.imputed,
            "league-average defaults substituted"
        );
    }

    Ok(Vectorized {
        vector: FeatureVector {
            values,
            manifest_fingerprint: manifest.fingerprint(),
        },
        imputed: imp.imputed,
    })
}

fn resolve(
    home: &TeamStats,
    away: &TeamStats,
    ctx: &MatchContext,
    avg: &LeagueAverages,
    imp: &mut Imputer,
) -> Resolved {
    let home_season = imp.take(home.season_ppg, avg.season_ppg, "home.season_ppg");
    let away_season = imp.take(away.season_ppg, avg.season_ppg, "away.season_ppg");
    let home_form = imp.take(home.form_ppg, home_season, "home.form_ppg");
    let away_form = imp.take(away.form_ppg, away_season, "away.form_ppg");
    let home_pos = imp.take(
        home.league_position.map(f64::from),
        avg.league_position,
        "home.league_position",
    );
    let away_pos = imp.take(
        away.league_position.map(f64::from),
        avg.league_position,
        "away.league_position",
    );
    let is_derby = if ctx.is_derby { 1.0 } else { 0.0 };
    let home_motivation =
        team_motivation(home.motivation, home_pos, avg.league_size) + 0.5 * is_derby;
    let away_motivation =
        team_motivation(away.motivation, away_pos, avg.league_size) + 0.5 * is_derby;

    Resolved {
        home_form,
        away_form,
        home_season,
        away_season,
        home_gf: imp.take(home.goals_for_pg, avg.goals_for_pg, "home.goals_for_pg"),
        home_ga: imp.take(home.goals_against_pg, avg.goals_against_pg, "home.goals_against_pg"),
        away_gf: imp.take(away.goals_for_pg, avg.goals_for_pg, "away.goals_for_pg"),
        away_ga: imp.take(away.goals_against_pg, avg.goals_against_pg, "away.goals_against_pg"),
        home_venue_wr: imp.take(home.home_win_rate, avg.home_win_rate, "home.home_win_rate"),
        away_venue_wr: imp.take(away.away_win_rate, avg.away_win_rate, "away.away_win_rate"),
        home_venue_gf: imp.take(
            home.home_goals_for_pg,
            avg.home_goals_for_pg,
            "home.home_goals_for_pg",
        ),
        away_venue_gf: imp.take(
            away.away_goals_for_pg,
            avg.away_goals_for_pg,
            "away.away_goals_for_pg",
        ),
        home_pos,
        away_pos,
        home_rest: imp.take(home.rest_days, avg.rest_days, "home.rest_days"),
        away_rest: imp.take(away.rest_days, avg.rest_days, "away.rest_days"),
        travel_km: imp.take(ctx.travel_km, avg.travel_km, "context.travel_km"),
        home_motivation,
        away_motivation,
        is_derby,
        h2h: imp.take(
            ctx.h2h_home_win_rate,
            avg.h2h_home_win_rate,
            "context.h2h_home_win_rate",
        ),
        home_elo: imp.take(home.elo, avg.elo, "home.elo"),
        away_elo: imp.take(away.elo, avg.elo, "away.elo"),
    }
}

// Title race (top six) and relegation battle (bottom four) both raise stakes.
fn team_motivation(explicit: Option<f64>, position: f64, league_size: u32) -> f64 {
    if let Some(m) = explicit.filter(|m| m.is_finite()) {
        return m.clamp(0.0, 1.0);
    }
    let size = f64::from(league_size.max(4));
    let mut m = 0.0;
    if position <= 6.0 {
        m += 0.3;
    }
    if position > size - 4.0 {
        m += 0.4;
    }
    m
}

fn feature_value(name: &str, r: &Resolved) -> Option<f64> {
    let v = match name {
        "home_form_ppg" => r.home_form,
        "away_form_ppg" => r.away_form,
        "form_ppg_diff" => r.home_form - r.away_form,
        "home_goals_for_pg" => r.home_gf,
        "home_goals_against_pg" => r.home_ga,
        "away_goals_for_pg" => r.away_gf,
        "away_goals_against_pg" => r.away_ga,
        "home_goal_diff_pg" => r.home_gf - r.home_ga,
        "away_goal_diff_pg" => r.away_gf - r.away_ga,
        "home_venue_win_rate" => r.home_venue_wr,
        "away_venue_win_rate" => r.away_venue_wr,
        "home_venue_goals_for" => r.home_venue_gf,
        "away_venue_goals_for" => r.away_venue_gf,
        "home_momentum" => r.home_form / r.home_season.max(0.1),
        "away_momentum" => r.away_form / r.away_season.max(0.1),
        "position_diff" => r.away_pos - r.home_pos,
        "home_rest_days" => r.home_rest,
        "away_rest_days" => r.away_rest,
        "rest_diff" => r.home_rest - r.away_rest,
        "travel_km" => r.travel_km,
        "away_travel_fatigue" => r.travel_km / (r.away_rest.max(0.0) + 1.0),
        "home_motivation" => r.home_motivation,
        "away_motivation" => r.away_motivation,
        "is_derby" => r.is_derby,
        "h2h_home_win_rate" => r.h2h,
        "elo_diff" => r.home_elo - r.away_elo,
        _ => return None,
    };
    Some(v)
}
