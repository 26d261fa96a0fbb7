use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::app_cache_dir;
use crate::market::MarketOdds;
use crate::outcome::{Outcome, classify_outcome};
use crate::pick::PickKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMatch {
    pub league: String,
    pub season: String,
    pub match_date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub home_goals: Option<u32>,
    #[serde(default)]
    pub away_goals: Option<u32>,
    /// Closing 1X2 prices, when the source carried them.
    #[serde(default)]
    pub odds: Option<MarketOdds>,
    pub source: String,
    #[serde(default)]
    pub synthetic: bool,
}

impl HistoricalMatch {
    pub fn outcome(&self) -> Option<Outcome> {
        let (Some(h), Some(a)) = (self.home_goals, self.away_goals) else {
            return None;
        };
        Some(classify_outcome(h as i32, a as i32))
    }

    pub fn key(&self) -> PickKey {
        PickKey::new(&self.home_team, &self.away_team, self.match_date)
    }

    pub fn label(&self) -> String {
        format!("{} vs {} ({})", self.home_team, self.away_team, self.match_date)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub rows_read: usize,
    pub matches_upserted: usize,
    pub errors: Vec<String>,
}

pub fn default_db_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join("history.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_key TEXT PRIMARY KEY,
            league TEXT NOT NULL,
            season TEXT NOT NULL,
            match_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            odds_home REAL NULL,
            odds_draw REAL NULL,
            odds_away REAL NULL,
            outcome TEXT NULL,
            source TEXT NOT NULL,
            synthetic INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            source TEXT NOT NULL,
            rows_read INTEGER NOT NULL,
            matches_upserted INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

pub fn upsert_matches(conn: &mut Connection, matches: &[HistoricalMatch]) -> Result<usize> {
    let tx = conn.transaction().context("begin upsert transaction")?;
    for m in matches {
        upsert_match(&tx, m)?;
    }
    tx.commit().context("commit upsert transaction")?;
    Ok(matches.len())
}

pub fn record_ingest_run(conn: &Connection, source: &str, summary: &IngestSummary) -> Result<()> {
    let errors_json = serde_json::to_string(&summary.errors).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO ingest_runs(started_at, source, rows_read, matches_upserted, errors_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Utc::now().to_rfc3339(),
            source,
            summary.rows_read as i64,
            summary.matches_upserted as i64,
            errors_json
        ],
    )
    .context("insert ingest run")?;
    Ok(())
}

fn upsert_match(tx: &rusqlite::Transaction<'_>, m: &HistoricalMatch) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO matches (
            match_key, league, season, match_date, home_team, away_team,
            home_goals, away_goals, odds_home, odds_draw, odds_away,
            outcome, source, synthetic, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15
        )
        ON CONFLICT(match_key) DO UPDATE SET
            league = excluded.league,
            season = excluded.season,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            odds_home = excluded.odds_home,
            odds_draw = excluded.odds_draw,
            odds_away = excluded.odds_away,
            outcome = excluded.outcome,
            source = excluded.source,
            synthetic = excluded.synthetic,
            updated_at = excluded.updated_at
        "#,
        params![
            m.key().to_string(),
            m.league,
            m.season,
            m.match_date.to_string(),
            m.home_team,
            m.away_team,
            m.home_goals,
            m.away_goals,
            m.odds.map(|o| o.home),
            m.odds.map(|o| o.draw),
            m.odds.map(|o| o.away),
            m.outcome().map(|o| o.label().to_string()),
            m.source,
            if m.synthetic { 1 } else { 0 },
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert match")?;
    Ok(())
}

/// Finished matches ordered by date, optionally restricted to one league.
pub fn load_finished_matches(
    conn: &Connection,
    league: Option<&str>,
) -> Result<Vec<HistoricalMatch>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                league, season, match_date, home_team, away_team,
                home_goals, away_goals, odds_home, odds_draw, odds_away,
                source, synthetic
            FROM matches
            WHERE home_goals IS NOT NULL
              AND away_goals IS NOT NULL
              AND (?1 IS NULL OR league = ?1)
            ORDER BY match_date ASC, match_key ASC
            "#,
        )
        .context("prepare load matches query")?;

    let rows = stmt
        .query_map(params![league], |row| {
            let date: String = row.get(2)?;
            let odds_home: Option<f64> = row.get(7)?;
            let odds_draw: Option<f64> = row.get(8)?;
            let odds_away: Option<f64> = row.get(9)?;
            Ok((
                date,
                HistoricalMatch {
                    league: row.get(0)?,
                    season: row.get(1)?,
                    match_date: NaiveDate::MIN,
                    home_team: row.get(3)?,
                    away_team: row.get(4)?,
                    home_goals: row.get(5)?,
                    away_goals: row.get(6)?,
                    odds: match (odds_home, odds_draw, odds_away) {
                        (Some(h), Some(d), Some(a)) => Some(MarketOdds::new(h, d, a)),
                        _ => None,
                    },
                    source: row.get(10)?,
                    synthetic: row.get::<_, i64>(11)? != 0,
                },
            ))
        })
        .context("query load matches")?;

    let mut out = Vec::new();
    for row in rows {
        let (date, mut m) = row.context("decode match row")?;
        m.match_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("bad stored date {date}"))?;
        out.push(m);
    }
    Ok(out)
}

pub fn latest_match_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = conn
        .query_row("SELECT MAX(match_date) FROM matches", [], |row| row.get(0))
        .optional()
        .context("query latest match date")?
        .flatten();
    raw.map(|d| {
        NaiveDate::parse_from_str(&d, "%Y-%m-%d").with_context(|| format!("bad stored date {d}"))
    })
    .transpose()
}

/// football-data.co.uk layout: `Date,HomeTeam,AwayTeam,FTHG,FTAG` plus
/// optional `B365H,B365D,B365A` (falls back to `PSH/PSD/PSA`, then `AvgH/D/A`).
pub fn parse_football_data_csv(
    raw: &str,
    league: &str,
    season: &str,
) -> Result<(Vec<HistoricalMatch>, Vec<String>)> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines.next().ok_or_else(|| anyhow!("empty csv"))?;
    let header: Vec<String> = split_csv_line(header_line)
        .into_iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let col = |name: &str| header.iter().position(|h| h == name);

    let date_idx = col("Date").ok_or_else(|| anyhow!("csv missing Date column"))?;
    let home_idx = col("HomeTeam")
        .or_else(|| col("Home"))
        .ok_or_else(|| anyhow!("csv missing HomeTeam column"))?;
    let away_idx = col("AwayTeam")
        .or_else(|| col("Away"))
        .ok_or_else(|| anyhow!("csv missing AwayTeam column"))?;
    let hg_idx = col("FTHG").or_else(|| col("HG"));
    let ag_idx = col("FTAG").or_else(|| col("AG"));
    let odds_cols = [("B365H", "B365D", "B365A"), ("PSH", "PSD", "PSA"), ("AvgH", "AvgD", "AvgA")]
        .into_iter()
        .filter_map(|(h, d, a)| Some((col(h)?, col(d)?, col(a)?)))
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    let mut errors = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let cells = split_csv_line(line);
        let get = |idx: usize| cells.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty());

        let Some(date) = get(date_idx).and_then(parse_csv_date) else {
            errors.push(format!("line {}: bad or missing date", line_no + 2));
            continue;
        };
        let (Some(home), Some(away)) = (get(home_idx), get(away_idx)) else {
            errors.push(format!("line {}: missing team", line_no + 2));
            continue;
        };
        let home_goals = hg_idx.and_then(get).and_then(|s| s.parse::<u32>().ok());
        let away_goals = ag_idx.and_then(get).and_then(|s| s.parse::<u32>().ok());
        let odds = odds_cols.iter().find_map(|(h, d, a)| {
            let odds = MarketOdds::new(
                get(*h)?.parse().ok()?,
                get(*d)?.parse().ok()?,
                get(*a)?.parse().ok()?,
            );
            odds.validate().is_ok().then_some(odds)
        });

        out.push(HistoricalMatch {
            league: league.to_string(),
            season: season.to_string(),
            match_date: date,
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_goals,
            away_goals,
            odds,
            source: format!("football-data:{league}"),
            synthetic: false,
        });
    }
    debug!(rows = out.len(), errors = errors.len(), "parsed csv");
    Ok((out, errors))
}

fn parse_csv_date(raw: &str) -> Option<NaiveDate> {
    if raw.contains('-') {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }
    let year_digits = raw.rsplit('/').next().map(str::len).unwrap_or(0);
    let fmt = if year_digits == 2 { "%d/%m/%y" } else { "%d/%m/%Y" };
    NaiveDate::parse_from_str(raw, fmt).ok()
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => out.push(std::mem::take(&mut cur)),
            _ => cur.push(ch),
        }
    }
    out.push(cur);
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{load_finished_matches, open_db, parse_football_data_csv, upsert_matches};
    use crate::outcome::Outcome;

    const CSV: &str = "Div,Date,HomeTeam,AwayTeam,FTHG,FTAG,FTR,B365H,B365D,B365A\n\
E0,16/08/2024,Man United,Fulham,1,0,H,1.60,4.20,5.25\n\
E0,17/08/24,Ipswich,Liverpool,0,2,A,8.00,5.00,1.36\n\
E0,17/08/2024,Arsenal,,2,0,H,1.2,7,13\n\
E0,31/05/2025,Everton,Brighton,,,,2.5,3.3,2.9\n";

    #[test]
    fn parses_football_data_rows() {
        let (rows, errors) = parse_football_data_csv(CSV, "E0", "2024-25").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(rows[0].outcome(), Some(Outcome::Home));
        assert_eq!(rows[1].match_date, NaiveDate::from_ymd_opt(2024, 8, 17).unwrap());
        assert!((rows[1].odds.unwrap().away - 1.36).abs() < 1e-12);
        assert!(rows[2].outcome().is_none());
    }

    #[test]
    fn upsert_is_keyed_and_only_finished_load() {
        let path = std::env::temp_dir()
            .join(format!("kicklab_history_{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut conn = open_db(&path).unwrap();
        let (rows, _) = parse_football_data_csv(CSV, "E0", "2024-25").unwrap();
        upsert_matches(&mut conn, &rows).unwrap();
        upsert_matches(&mut conn, &rows).unwrap();
        let loaded = load_finished_matches(&conn, Some("E0")).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].home_team, "Man United");
        assert!(load_finished_matches(&conn, Some("SP1")).unwrap().is_empty());
        drop(conn);
        let _ = std::fs::remove_file(&path);
    }
}
