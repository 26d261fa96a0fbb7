use std::collections::HashMap;

use chrono::NaiveDate;

use crate::features::{MatchContext, TeamStats};
use crate::history::HistoricalMatch;
use crate::outcome::Outcome;
use crate::pick::normalize_team;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormConfig {
    pub form_window: usize,
    pub season_window: usize,
    pub elo: EloConfig,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            season_window: 38,
            elo: EloConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Played {
    date: NaiveDate,
    points: u32,
    goals_for: u32,
    goals_against: u32,
    at_home: bool,
}

#[derive(Debug, Clone)]
struct TeamRecord {
    name: String,
    played: Vec<Played>,
    elo: f64,
}

/// Per-team aggregates built by replaying finished matches in date order.
/// Stats reflect only matches recorded so far, so recording after predicting
/// gives leak-free walk-forward features.
#[derive(Debug, Clone, Default)]
pub struct FormTracker {
    cfg: FormConfig,
    teams: HashMap<String, TeamRecord>,
    meetings: HashMap<(String, String), Vec<Outcome>>,
}

impl FormTracker {
    pub fn new(cfg: FormConfig) -> Self {
        Self {
            cfg,
            teams: HashMap::new(),
            meetings: HashMap::new(),
        }
    }

    /// Replays every finished match strictly before `before`.
    pub fn from_history(matches: &[HistoricalMatch], before: NaiveDate, cfg: FormConfig) -> Self {
        let mut sorted: Vec<&HistoricalMatch> = matches
            .iter()
            .filter(|m| m.match_date < before && m.outcome().is_some())
            .collect();
        sorted.sort_by(|a, b| a.match_date.cmp(&b.match_date).then_with(|| a.key().cmp(&b.key())));
        let mut tracker = Self::new(cfg);
        for m in sorted {
            tracker.record(m);
        }
        tracker
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    pub fn record(&mut self, m: &HistoricalMatch) {
        let (Some(hg), Some(ag), Some(outcome)) = (m.home_goals, m.away_goals, m.outcome()) else {
            return;
        };
        let home_key = normalize_team(&m.home_team);
        let away_key = normalize_team(&m.away_team);

        let eh = self.entry(&home_key, &m.home_team).elo;
        let ea = self.entry(&away_key, &m.away_team).elo;
        let expected_home = expected_score(eh + self.cfg.elo.home_adv_pts, ea);
        let s_home = match outcome {
            Outcome::Home => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Away => 0.0,
        };
        let delta = self.cfg.elo.k * (s_home - expected_home);

        let (home_pts, away_pts) = match outcome {
            Outcome::Home => (3, 0),
            Outcome::Draw => (1, 1),
            Outcome::Away => (0, 3),
        };
        {
            let home = self.entry(&home_key, &m.home_team);
            home.elo = eh + delta;
            home.played.push(Played {
                date: m.match_date,
                points: home_pts,
                goals_for: hg,
                goals_against: ag,
                at_home: true,
            });
        }
        {
            let away = self.entry(&away_key, &m.away_team);
            away.elo = ea - delta;
            away.played.push(Played {
                date: m.match_date,
                points: away_pts,
                goals_for: ag,
                goals_against: hg,
                at_home: false,
            });
        }

        let (pair, flipped) = pair_key(&home_key, &away_key);
        let as_first = if flipped { flip(outcome) } else { outcome };
        self.meetings.entry(pair).or_default().push(as_first);
    }

    fn entry(&mut self, key: &str, display: &str) -> &mut TeamRecord {
        self.teams.entry(key.to_string()).or_insert_with(|| TeamRecord {
            name: display.to_string(),
            played: Vec::new(),
            elo: 1500.0,
        })
    }

    pub fn elo(&self, team: &str) -> Option<f64> {
        self.teams.get(&normalize_team(team)).map(|t| t.elo)
    }

    pub fn team_stats(&self, team: &str, as_of: NaiveDate) -> TeamStats {
        let Some(rec) = self.teams.get(&normalize_team(team)) else {
            return TeamStats::unknown(team);
        };
        let season = tail(&rec.played, self.cfg.season_window);
        let form = tail(&rec.played, self.cfg.form_window);
        if season.is_empty() {
            return TeamStats {
                elo: Some(rec.elo),
                ..TeamStats::unknown(&rec.name)
            };
        }

        let home: Vec<&Played> = season.iter().filter(|p| p.at_home).collect();
        let away: Vec<&Played> = season.iter().filter(|p| !p.at_home).collect();
        let rest = season
            .last()
            .map(|p| (as_of - p.date).num_days().clamp(0, 30) as f64);

        TeamStats {
            team: rec.name.clone(),
            matches_played: Some(season.len() as u32),
            form_ppg: Some(ppg(form.iter())),
            season_ppg: Some(ppg(season.iter())),
            goals_for_pg: Some(mean(season.iter().map(|p| p.goals_for as f64))),
            goals_against_pg: Some(mean(season.iter().map(|p| p.goals_against as f64))),
            home_win_rate: (!home.is_empty()).then(|| win_rate(home.iter().copied())),
            away_win_rate: (!away.is_empty()).then(|| win_rate(away.iter().copied())),
            home_goals_for_pg: (!home.is_empty())
                .then(|| mean(home.iter().map(|p| p.goals_for as f64))),
            away_goals_for_pg: (!away.is_empty())
                .then(|| mean(away.iter().map(|p| p.goals_for as f64))),
            league_position: self.position(&normalize_team(team)),
            rest_days: rest,
            elo: Some(rec.elo),
            motivation: None,
        }
    }

    pub fn match_context(&self, home: &str, away: &str, date: NaiveDate) -> MatchContext {
        let (pair, flipped) = pair_key(&normalize_team(home), &normalize_team(away));
        let h2h = self.meetings.get(&pair).filter(|m| !m.is_empty()).map(|m| {
            let wins = m
                .iter()
                .filter(|o| if flipped { **o == Outcome::Away } else { **o == Outcome::Home })
                .count();
            wins as f64 / m.len() as f64
        });
        MatchContext {
            match_date: date,
            travel_km: None,
            is_derby: false,
            h2h_home_win_rate: h2h,
        }
    }

    // Rank by season points per game among teams with a recorded match.
    fn position(&self, key: &str) -> Option<u32> {
        let own = self.teams.get(key)?;
        let own_ppg = ppg(tail(&own.played, self.cfg.season_window).iter());
        let better = self
            .teams
            .iter()
            .filter(|(k, t)| k.as_str() != key && !t.played.is_empty())
            .filter(|(_, t)| ppg(tail(&t.played, self.cfg.season_window).iter()) > own_ppg)
            .count();
        Some(better as u32 + 1)
    }
}

fn tail(played: &[Played], n: usize) -> &[Played] {
    &played[played.len().saturating_sub(n)..]
}

fn ppg<'a>(it: impl Iterator<Item = &'a Played>) -> f64 {
    mean(it.map(|p| p.points as f64))
}

fn win_rate<'a>(it: impl Iterator<Item = &'a Played>) -> f64 {
    mean(it.map(|p| if p.points == 3 { 1.0 } else { 0.0 }))
}

fn mean(it: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = it.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn pair_key(a: &str, b: &str) -> ((String, String), bool) {
    if a <= b {
        ((a.to_string(), b.to_string()), false)
    } else {
        ((b.to_string(), a.to_string()), true)
    }
}

fn flip(o: Outcome) -> Outcome {
    match o {
        Outcome::Home => Outcome::Away,
        Outcome::Away => Outcome::Home,
        Outcome::Draw => Outcome::Draw,
    }
}

fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}
