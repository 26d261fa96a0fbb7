use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, mpsc};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use kicklab::artifact::{ArtifactStore, LiveModel};
use kicklab::backtest::BacktestConfig;
use kicklab::calibration::DriftReport;
use kicklab::config::EngineConfig;
use kicklab::history::{self, HistoricalMatch};
use kicklab::ledger::Ledger;
use kicklab::ledger_store::LedgerStore;
use kicklab::logging;
use kicklab::pipeline::{PickBatch, PickSettings, generate_picks};
use kicklab::providers::{InlineOdds, load_fixtures_json};
use kicklab::scheduler::{
    RetrainInputs, RetrainOutcome, RetrainScheduler, SchedulerEvent, StalenessPolicy,
    spawn_scheduler,
};
use kicklab::team_form::{FormConfig, FormTracker};
use kicklab::training::TrainingConfig;

fn main() -> Result<()> {
    logging::init();
    let cfg = EngineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let store = ArtifactStore::new(&cfg.artifact_dir);
    // A corrupt live artifact stops the process; a missing one only means
    // picks are unavailable until a model is promoted.
    let live = match store.load_live().context("load live model artifact")? {
        Some(artifact) => {
            info!(model = %artifact.id, "live model loaded");
            Arc::new(LiveModel::with(artifact))
        }
        None => Arc::new(LiveModel::empty()),
    };

    let corpus = load_corpus(&cfg.history_db)?;
    let scheduler = Arc::new(RetrainScheduler::new(
        store,
        live.clone(),
        TrainingConfig::default(),
        BacktestConfig {
            stake: cfg.flat_stake,
            calibrator: cfg.calibrator(),
            ..BacktestConfig::default()
        },
        StalenessPolicy {
            max_age_days: cfg.max_artifact_age_days,
            threshold: cfg.confidence_threshold,
            ..StalenessPolicy::default()
        },
    ));

    let retrain = arg_value(&args, "--retrain")
        .or_else(|| has_flag(&args, "--retrain").then(String::new));
    if let Some(mode) = retrain {
        let drift = ledger_drift(&cfg)?;
        let force = mode == "force";
        let outcome = scheduler.maybe_retrain(&corpus, drift.as_ref(), force, Utc::now())?;
        print_retrain(&outcome);
    }

    if has_flag(&args, "--watch") {
        return watch(scheduler, &cfg);
    }

    let fixtures_path = arg_value(&args, "--fixtures")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("fixtures.json"));
    let fixtures = load_fixtures_json(&fixtures_path)?;
    let Some(first_day) = fixtures.iter().map(|f| f.match_date).min() else {
        println!("No fixtures in {}", fixtures_path.display());
        return Ok(());
    };
    let tracker = FormTracker::from_history(&corpus, first_day, FormConfig::default());

    let settings = PickSettings {
        calibrator: cfg.calibrator(),
        confidence_threshold: cfg.confidence_threshold,
    };
    let batch = generate_picks(
        &live,
        &fixtures,
        &tracker,
        &InlineOdds,
        &settings,
        &cfg.bankroll,
        Utc::now(),
    );

    let mut ledger = Ledger::with_store(LedgerStore::open(&cfg.ledger_db)?, cfg.flat_stake)?;
    match &batch {
        PickBatch::Unavailable { reason } => {
            println!("Picks unavailable: {reason}");
        }
        PickBatch::Ready { model_id, picks, skipped } => {
            let added = ledger.record_all(picks.iter().cloned())?;
            println!("Model {model_id}: {} picks ({} new in ledger)", picks.len(), added);
            for pick in picks {
                println!(
                    "{} {:<28} {:<9} {:>5.1}%  odds {:>5}  edge {:>6}  {}",
                    pick.key.match_date,
                    pick.match_label(),
                    pick.prediction.label(),
                    pick.confidence * 100.0,
                    pick.odds_taken.map(|o| format!("{o:.2}")).unwrap_or_else(|| "-".to_string()),
                    pick.edge_pct.map(|e| format!("{e:+.1}")).unwrap_or_else(|| "-".to_string()),
                    if pick.is_bet() { "BET" } else { "" },
                );
            }
            for s in skipped {
                println!("skipped {}: {}", s.fixture, s.reason);
            }
            println!("Bet now: {}", batch.bet_now().len());
        }
    }

    let stats = ledger.running_stats();
    println!(
        "Ledger: {} bets, {}W-{}L, win rate {:.1}%, pending {}",
        stats.total_bets,
        stats.wins,
        stats.losses,
        stats.win_rate * 100.0,
        stats.pending
    );
    println!(
        "        profit {:+.2}, ROI {:+.1}%, streak {:+}",
        stats.total_profit,
        stats.roi * 100.0,
        stats.streak
    );
    Ok(())
}

fn load_corpus(path: &Path) -> Result<Vec<HistoricalMatch>> {
    let conn = history::open_db(path)?;
    history::load_finished_matches(&conn, None)
}

fn ledger_drift(cfg: &EngineConfig) -> Result<Option<DriftReport>> {
    let ledger = Ledger::with_store(LedgerStore::open(&cfg.ledger_db)?, cfg.flat_stake)?;
    if ledger.is_empty() {
        return Ok(None);
    }
    Ok(Some(ledger.drift(cfg.drift_window, cfg.drift_accuracy_floor)))
}

fn print_retrain(outcome: &RetrainOutcome) {
    match outcome {
        RetrainOutcome::NotNeeded => println!("Retrain: live model is current"),
        RetrainOutcome::Promoted { artifact, reason, comparison } => {
            println!("Retrain ({reason}): promoted {}", artifact.id);
            if let Some(cmp) = comparison {
                println!(
                    "  vs {}: log loss {:+.4}, ROI {:+.1}%",
                    cmp.baseline.model_id,
                    cmp.log_loss_delta,
                    cmp.roi_delta * 100.0
                );
            }
        }
        RetrainOutcome::Rejected { challenger_id, reason, why, .. } => {
            println!("Retrain ({reason}): rejected {challenger_id}: {why}");
        }
    }
}

struct DbInputs {
    cfg: EngineConfig,
}

impl RetrainInputs for DbInputs {
    fn corpus(&mut self) -> Result<Vec<HistoricalMatch>> {
        load_corpus(&self.cfg.history_db)
    }

    fn drift(&mut self) -> Option<DriftReport> {
        match ledger_drift(&self.cfg) {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ledger unavailable for drift check");
                None
            }
        }
    }
}

fn watch(scheduler: Arc<RetrainScheduler>, cfg: &EngineConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_scheduler(
        scheduler,
        DbInputs { cfg: cfg.clone() },
        cfg.retrain_poll,
        tx,
        stop.clone(),
    );
    info!(poll_secs = cfg.retrain_poll.as_secs(), "watching for retrain triggers");
    for event in rx {
        match event {
            SchedulerEvent::Checked { due } => info!(due, "scheduler check"),
            SchedulerEvent::Promoted { id, reason } => println!("promoted {id} ({reason})"),
            SchedulerEvent::Rejected { id, why } => println!("rejected {id}: {why}"),
            SchedulerEvent::Failed(err) => warn!(%err, "scheduler run failed"),
        }
    }
    let _ = handle.join();
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
