use std::sync::atomic::AtomicBool;

use chrono::Utc;

use kicklab::backtest::{BacktestConfig, Harness, Provenance, time_split};
use kicklab::history::HistoricalMatch;
use kicklab::synthetic::{SyntheticConfig, generate_corpus};
use kicklab::training::{TrainingConfig, train_artifact};

fn corpus(n: usize, seed: u64) -> Vec<HistoricalMatch> {
    generate_corpus(&SyntheticConfig {
        n_matches: n,
        seed,
        ..SyntheticConfig::default()
    })
}

#[test]
fn profit_reconciles_with_wins_and_odds() {
    let all = corpus(600, 5);
    let (train, eval) = time_split(&all, 0.4, 50);
    let artifact = train_artifact(&train, &TrainingConfig::quick(), Utc::now()).unwrap();
    let stake = 25.0;
    let harness = Harness::new(BacktestConfig {
        stake,
        ..BacktestConfig::default()
    })
    .with_warmup(&train);
    let run = harness.run(&eval, &artifact, 0.40);

    assert!(run.completed);
    assert_eq!(run.evaluated + run.skipped.len(), run.total_matches);
    assert!(run.bets_placed > 0);
    let n = run.bets_placed as f64;
    let w = run.wins as f64;
    let expected = w * stake * (run.avg_winning_odds - 1.0) - (n - w) * stake;
    assert!((run.total_profit - expected).abs() < 1e-6, "{} vs {expected}", run.total_profit);
    assert!((run.roi - run.total_profit / (n * stake)).abs() < 1e-12);
    assert!((run.metrics.brier).is_finite() && run.metrics.samples == run.evaluated);
}

#[test]
fn synthetic_runs_are_never_live_validated() {
    let all = corpus(300, 9);
    let artifact = train_artifact(&all, &TrainingConfig::quick(), Utc::now()).unwrap();
    let report = Harness::new(BacktestConfig::default()).sweep(&all, &artifact, &[0.4, 0.6]);
    assert!(matches!(report.provenance, Provenance::Synthetic { .. }));
    assert!(report.runs.iter().all(|r| !r.live_validated));
    assert!(report.provenance.label().contains("SYNTHETIC"));

    let mut mixed = all.clone();
    for m in mixed.iter_mut().take(10) {
        m.synthetic = false;
        m.source = "football-data:E0".to_string();
    }
    let run = Harness::new(BacktestConfig::default()).run(&mixed, &artifact, 0.5);
    assert!(matches!(run.provenance, Provenance::Mixed { historical: 10, .. }));
    assert!(!run.live_validated);
}

#[test]
fn raising_the_threshold_never_adds_bets() {
    let all = corpus(500, 21);
    let (train, eval) = time_split(&all, 0.4, 50);
    let artifact = train_artifact(&train, &TrainingConfig::quick(), Utc::now()).unwrap();
    let report = Harness::new(BacktestConfig::default())
        .with_warmup(&train)
        .sweep(&eval, &artifact, &[0.35, 0.45, 0.55, 0.65]);
    let bets: Vec<usize> = report.runs.iter().map(|r| r.bets_placed).collect();
    assert!(bets.windows(2).all(|w| w[0] >= w[1]), "{bets:?}");
    // Scoring does not depend on the threshold.
    let ll = report.runs[0].metrics.log_loss;
    assert!(report.runs.iter().all(|r| r.metrics.log_loss == ll));
}

#[test]
fn comparing_a_model_with_itself_shows_no_delta() {
    let all = corpus(400, 3);
    let (train, eval) = time_split(&all, 0.3, 50);
    let artifact = train_artifact(&train, &TrainingConfig::quick(), Utc::now()).unwrap();
    let cmp = Harness::new(BacktestConfig::default())
        .with_warmup(&train)
        .compare(&eval, &artifact, &artifact, 0.45);
    assert_eq!(cmp.baseline.bets_placed, cmp.challenger.bets_placed);
    assert_eq!(cmp.roi_delta, 0.0);
    assert_eq!(cmp.win_rate_delta, 0.0);
    assert_eq!(cmp.log_loss_delta, 0.0);
}

#[test]
fn cancelled_run_reports_partial_results() {
    let all = corpus(200, 4);
    let artifact = train_artifact(&all, &TrainingConfig::quick(), Utc::now()).unwrap();
    let stop = AtomicBool::new(true);
    let run = Harness::new(BacktestConfig::default())
        .with_cancel(&stop)
        .run(&all, &artifact, 0.5);
    assert!(!run.completed);
    assert_eq!(run.bets_placed, 0);
    assert_eq!(run.total_profit, 0.0);
    assert_eq!(run.total_matches, all.len());
}
