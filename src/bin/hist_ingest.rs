use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use kicklab::config::EngineConfig;
use kicklab::history::{self, IngestSummary};
use kicklab::logging;
use kicklab::synthetic::{SyntheticConfig, generate_corpus};

fn main() -> Result<()> {
    logging::init();
    let cfg = EngineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let db_path = arg_value(&args, "--db")
        .map(PathBuf::from)
        .unwrap_or(cfg.history_db);
    let mut conn = history::open_db(&db_path)?;

    if let Some(n) = synthetic_arg(&args) {
        let rows = generate_corpus(&SyntheticConfig {
            n_matches: n,
            ..SyntheticConfig::default()
        });
        let summary = IngestSummary {
            rows_read: rows.len(),
            matches_upserted: history::upsert_matches(&mut conn, &rows)?,
            errors: Vec::new(),
        };
        history::record_ingest_run(&conn, "synthetic", &summary)?;
        println!(
            "Synthetic rows upserted: {} (tagged, never live-validated)",
            summary.matches_upserted
        );
        return Ok(());
    }

    let files = csv_paths(&args);
    if files.is_empty() {
        return Err(anyhow!(
            "usage: hist_ingest [--db PATH] [--league E0] [--season 2024-25] FILE.csv..."
        ));
    }
    let league = arg_value(&args, "--league").unwrap_or_else(|| "E0".to_string());

    let mut total = IngestSummary::default();
    for path in &files {
        let season = arg_value(&args, "--season").unwrap_or_else(|| season_from_file(path));
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let (rows, errors) = history::parse_football_data_csv(&raw, &league, &season)?;
        let summary = IngestSummary {
            rows_read: rows.len() + errors.len(),
            matches_upserted: history::upsert_matches(&mut conn, &rows)?,
            errors,
        };
        history::record_ingest_run(&conn, &path.display().to_string(), &summary)?;
        println!(
            "{}: season {season} rows={} upserted={} errors={}",
            path.display(),
            summary.rows_read,
            summary.matches_upserted,
            summary.errors.len()
        );
        for err in summary.errors.iter().take(6) {
            println!("   - {err}");
        }
        total.rows_read += summary.rows_read;
        total.matches_upserted += summary.matches_upserted;
        total.errors.extend(summary.errors);
    }

    println!("Historical ingest complete");
    println!("DB: {}", db_path.display());
    println!("Matches upserted: {}", total.matches_upserted);
    println!(
        "Latest match: {}",
        history::latest_match_date(&conn)?
            .map(|d| d.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    Ok(())
}

fn csv_paths(args: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if matches!(arg.as_str(), "--db" | "--league" | "--season") {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(PathBuf::from(arg));
    }
    out
}

// football-data names files like E0_2324.csv.
fn season_from_file(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .filter(|s| s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| format!("20{}-{}", &s[..2], &s[2..]))
        .unwrap_or_else(|| "unknown".to_string())
}

fn synthetic_arg(args: &[String]) -> Option<usize> {
    for arg in args {
        if arg == "--synthetic" {
            return Some(SyntheticConfig::default().n_matches);
        }
        if let Some(raw) = arg.strip_prefix("--synthetic=") {
            return raw.trim().parse::<usize>().ok().filter(|n| *n > 0);
        }
    }
    None
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
