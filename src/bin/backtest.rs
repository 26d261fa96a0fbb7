use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use kicklab::artifact::{ArtifactStore, load_artifact};
use kicklab::backtest::{BacktestConfig, BacktestRun, DEFAULT_SWEEP, Harness, time_split};
use kicklab::config::EngineConfig;
use kicklab::history::{self, HistoricalMatch};
use kicklab::logging;
use kicklab::report_export::export_backtest;
use kicklab::synthetic::{SyntheticConfig, generate_corpus};
use kicklab::training::{TrainingConfig, train_artifact};

fn main() -> Result<()> {
    logging::init();
    let cfg = EngineConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    let corpus = load_corpus(&args, &cfg)?;
    if corpus.is_empty() {
        return Err(anyhow!("empty corpus; ingest history or pass --synthetic"));
    }

    // Without an explicit artifact the model is trained on the older part of
    // the corpus and scored on the newer part.
    let artifact_arg = arg_value(&args, "--artifact");
    let (warmup, eval, artifact) = match artifact_arg.as_deref() {
        Some("live") => {
            let a = ArtifactStore::new(&cfg.artifact_dir)
                .load_live()?
                .context("no live artifact promoted")?;
            (Vec::new(), corpus, a)
        }
        Some(path) => (Vec::new(), corpus, load_artifact(&PathBuf::from(path))?),
        None => {
            let fraction = arg_value(&args, "--holdout")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.4);
            let (train, eval) = time_split(&corpus, fraction, 50);
            let training = if has_flag(&args, "--quick") {
                TrainingConfig::quick()
            } else {
                TrainingConfig::default()
            };
            let a = train_artifact(&train, &training, Utc::now())?;
            println!("Trained {} on {} matches", a.id, train.len());
            (train, eval, a)
        }
    };

    let stake = arg_value(&args, "--stake")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(cfg.flat_stake);
    let thresholds = arg_value(&args, "--thresholds")
        .map(|raw| parse_thresholds(&raw))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SWEEP.to_vec());

    let harness = Harness::new(BacktestConfig {
        stake,
        calibrator: cfg.calibrator(),
        ..BacktestConfig::default()
    })
    .with_warmup(&warmup);

    let sweep = harness.sweep(&eval, &artifact, &thresholds);
    println!("Corpus: {}", sweep.provenance.label());
    if !sweep.provenance.is_live_validated() {
        println!("WARNING: these results do not validate live performance");
    }
    if let Some(run) = sweep.runs.first() {
        println!(
            "Evaluated {}/{} matches | Brier {:.4} | log loss {:.4} | accuracy {:.1}%",
            run.evaluated,
            run.total_matches,
            run.metrics.brier,
            run.metrics.log_loss,
            run.metrics.accuracy * 100.0
        );
    }
    println!("Threshold  Bets   Win%   BE%     Profit      ROI");
    for run in &sweep.runs {
        print_run(run);
    }
    match sweep.best_threshold {
        Some(t) => println!("Best threshold: {t:.2}"),
        None => println!("Best threshold: n/a (too few bets)"),
    }

    let comparison = match arg_value(&args, "--challenger") {
        Some(path) => {
            let challenger = load_artifact(&PathBuf::from(path))?;
            let threshold = arg_value(&args, "--threshold")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(cfg.confidence_threshold);
            let cmp = harness.compare(&eval, &artifact, &challenger, threshold);
            println!("Challenger {} vs baseline {} @ {threshold:.2}", challenger.id, artifact.id);
            print_run(&cmp.baseline);
            print_run(&cmp.challenger);
            println!(
                "Delta: win rate {:+.1}pp, ROI {:+.1}pp, profit {:+.2}, log loss {:+.4}",
                cmp.win_rate_delta * 100.0,
                cmp.roi_delta * 100.0,
                cmp.profit_delta,
                cmp.log_loss_delta
            );
            Some(cmp)
        }
        None => None,
    };

    if let Some(path) = arg_value(&args, "--export") {
        let report = export_backtest(&PathBuf::from(&path), &sweep, None, comparison.as_ref())?;
        println!("Exported {} runs, {} bets to {path}", report.runs, report.bets);
    }
    Ok(())
}

fn print_run(run: &BacktestRun) {
    println!(
        "{:>9.2} {:>5} {:>6.1} {:>5.1} {:>10.2} {:>7.1}%{}",
        run.threshold,
        run.bets_placed,
        run.win_rate * 100.0,
        run.break_even_rate * 100.0,
        run.total_profit,
        run.roi * 100.0,
        if run.completed { "" } else { "  (partial)" }
    );
}

fn load_corpus(args: &[String], cfg: &EngineConfig) -> Result<Vec<HistoricalMatch>> {
    for arg in args {
        if arg == "--synthetic" {
            return Ok(generate_corpus(&SyntheticConfig::default()));
        }
        if let Some(raw) = arg.strip_prefix("--synthetic=") {
            let n = raw.trim().parse::<usize>().context("--synthetic=N expects a match count")?;
            return Ok(generate_corpus(&SyntheticConfig {
                n_matches: n,
                ..SyntheticConfig::default()
            }));
        }
    }
    let db = arg_value(args, "--db")
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.history_db.clone());
    let conn = history::open_db(&db)?;
    history::load_finished_matches(&conn, arg_value(args, "--league").as_deref())
}

fn parse_thresholds(raw: &str) -> Vec<f64> {
    let mut out = raw
        .split([',', ';', ' '])
        .filter_map(|part| part.trim().parse::<f64>().ok())
        .filter(|t| (0.0..=1.0).contains(t))
        .collect::<Vec<_>>();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
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
