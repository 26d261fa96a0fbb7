use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;

use kicklab::artifact::{ArtifactStore, LiveModel};
use kicklab::backtest::BacktestConfig;
use kicklab::config::EngineConfig;
use kicklab::history::{self, HistoricalMatch};
use kicklab::logging;
use kicklab::scheduler::{RetrainOutcome, RetrainScheduler, StalenessPolicy};
use kicklab::synthetic::{SyntheticConfig, generate_corpus};
use kicklab::training::{TrainingConfig, Weighting, train_artifact};

fn main() -> Result<()> {
    logging::init();
    let cfg = EngineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let synthetic = synthetic_arg(&args);
    let corpus: Vec<HistoricalMatch> = match synthetic {
        Some(n) => generate_corpus(&SyntheticConfig {
            n_matches: n,
            ..SyntheticConfig::default()
        }),
        None => {
            let db = arg_value(&args, "--db")
                .map(PathBuf::from)
                .unwrap_or_else(|| cfg.history_db.clone());
            let conn = history::open_db(&db)?;
            history::load_finished_matches(&conn, arg_value(&args, "--league").as_deref())?
        }
    };
    if corpus.is_empty() {
        return Err(anyhow!("empty corpus; ingest history or pass --synthetic"));
    }

    let mut training = if has_flag(&args, "--quick") {
        TrainingConfig::quick()
    } else {
        TrainingConfig::default()
    };
    if has_flag(&args, "--skill-weights") {
        training.weighting = Weighting::Skill;
    }

    let store = ArtifactStore::new(
        arg_value(&args, "--artifact-dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| cfg.artifact_dir.clone()),
    );

    if !has_flag(&args, "--promote") {
        let artifact = train_artifact(&corpus, &training, Utc::now())?;
        let path = store.save(&artifact)?;
        println!("Saved {} to {}", artifact.id, path.display());
        if let Some(summary) = &artifact.training {
            println!("Corpus: {}", summary.corpus);
            println!("Rows: train={} holdout={}", summary.train_rows, summary.holdout_rows);
            if let Some(m) = &summary.holdout {
                println!(
                    "Holdout: brier {:.4} log loss {:.4} accuracy {:.1}%",
                    m.brier,
                    m.log_loss,
                    m.accuracy * 100.0
                );
            }
            for (name, m) in &summary.member_holdout {
                println!(
                    "  {name:<16} log loss {:.4} accuracy {:.1}%",
                    m.log_loss,
                    m.accuracy * 100.0
                );
            }
            if let Some(t) = summary.fitted_temperature {
                println!("Fitted temperature: {t:.2} (configured {:.2})", cfg.temperature);
            }
        }
        println!("Weights: {:?}", artifact.effective_weights());
        return Ok(());
    }

    // Promotion goes through the same validate-then-swap path as the
    // scheduler, forced regardless of staleness.
    let live = match store.load_live()? {
        Some(a) => LiveModel::with(a),
        None => LiveModel::empty(),
    };
    let scheduler = RetrainScheduler::new(
        store,
        Arc::new(live),
        training,
        BacktestConfig {
            stake: cfg.flat_stake,
            calibrator: cfg.calibrator(),
            ..BacktestConfig::default()
        },
        StalenessPolicy {
            threshold: cfg.confidence_threshold,
            allow_synthetic: synthetic.is_some() && has_flag(&args, "--allow-synthetic"),
            ..StalenessPolicy::default()
        },
    );
    match scheduler.maybe_retrain(&corpus, None, true, Utc::now())? {
        RetrainOutcome::Promoted { artifact, comparison, .. } => {
            println!("Promoted {}", artifact.id);
            if let Some(cmp) = comparison {
                println!(
                    "vs {}: log loss {:+.4}, win rate {:+.1}pp, ROI {:+.1}pp",
                    cmp.baseline.model_id,
                    cmp.log_loss_delta,
                    cmp.win_rate_delta * 100.0,
                    cmp.roi_delta * 100.0
                );
            }
        }
        RetrainOutcome::Rejected { challenger_id, why, .. } => {
            println!("Not promoted {challenger_id}: {why}");
        }
        RetrainOutcome::NotNeeded => println!("Nothing to do"),
    }
    Ok(())
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
