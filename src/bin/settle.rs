use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;

use kicklab::config::EngineConfig;
use kicklab::history;
use kicklab::ledger::Ledger;
use kicklab::ledger_store::LedgerStore;
use kicklab::logging;
use kicklab::providers::{HistoryResults, JsonResults, ResultsProvider};

fn main() -> Result<()> {
    logging::init();
    let cfg = EngineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let ledger_db = arg_value(&args, "--ledger")
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.ledger_db.clone());
    let mut ledger = Ledger::with_store(LedgerStore::open(&ledger_db)?, cfg.flat_stake)?;

    // Results come from a JSON drop when given, otherwise from finished
    // matches already in the history store.
    let provider: Box<dyn ResultsProvider> = match arg_value(&args, "--results") {
        Some(path) => Box::new(JsonResults::new(path)),
        None => {
            let conn = history::open_db(&cfg.history_db)?;
            Box::new(HistoryResults::new(history::load_finished_matches(&conn, None)?))
        }
    };

    let report = ledger.reconcile_from(provider.as_ref(), Utc::now())?;
    println!(
        "Settled {} | duplicates {} | unmatched results {} | conflicts {}",
        report.settled,
        report.already_settled,
        report.unmatched,
        report.conflicts.len()
    );
    for c in &report.conflicts {
        println!("  REVIEW {c}");
    }

    let stats = ledger.running_stats();
    println!("Bets: {} ({}W-{}L)", stats.total_bets, stats.wins, stats.losses);
    println!("Win rate: {:.1}%", stats.win_rate * 100.0);
    println!(
        "Staked: {:.2}  Profit: {:+.2}  ROI: {:+.1}%",
        stats.total_staked,
        stats.total_profit,
        stats.roi * 100.0
    );
    println!("Streak: {:+}", stats.streak);
    println!(
        "Accuracy (all settled picks): {:.1}% of {}  pending {}",
        stats.accuracy * 100.0,
        stats.settled_picks,
        stats.pending
    );

    let drift = ledger.drift(cfg.drift_window, cfg.drift_accuracy_floor);
    println!(
        "Drift: {:.1}% over last {} (floor {:.1}%){}",
        drift.accuracy * 100.0,
        drift.evaluated,
        drift.floor * 100.0,
        if drift.drifting { "  DRIFTING" } else { "" }
    );
    if has_flag(&args, "--reliability") {
        for bin in ledger.reliability(10).iter().filter(|b| b.count > 0) {
            println!(
                "  {:.1}-{:.1}: n={:<4} predicted {:.3} actual {:.3}",
                bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
            );
        }
    }
    Ok(())
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
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}
