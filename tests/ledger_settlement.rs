use chrono::{NaiveDate, TimeZone, Utc};

use kicklab::error::LedgerError;
use kicklab::ledger::{Ledger, SettleOutcome};
use kicklab::outcome::{ClassSet, Outcome, OutcomeDist, Selection};
use kicklab::pick::{Pick, PickKey};
use kicklab::providers::MatchResult;

fn pick(home: &str, away: &str, date: NaiveDate, prediction: Selection, odds: f64) -> Pick {
    let probs = match prediction {
        Selection::AwayWin => vec![0.2, 0.2, 0.6],
        Selection::Draw => vec![0.2, 0.6, 0.2],
        _ => vec![0.6, 0.2, 0.2],
    };
    Pick {
        key: PickKey::new(home, away, date),
        home_team: home.to_string(),
        away_team: away.to_string(),
        model_id: "20260220-000000-abcdef12".to_string(),
        prediction,
        confidence: 0.6,
        probabilities: OutcomeDist::new(ClassSet::ThreeWay, probs).unwrap(),
        odds: None,
        odds_taken: Some(odds),
        market_implied: Some(1.0 / odds),
        edge_pct: Some((0.6 - 1.0 / odds) * 100.0),
        threshold: 0.55,
        pass_filter: true,
        suggested_stake: None,
        imputed: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0).unwrap(),
        settlement: None,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
}

#[test]
fn double_settlement_counts_one_win() {
    let mut ledger = Ledger::new(100.0);
    let p = pick("TeamA", "TeamB", day(21), Selection::HomeWin, 1.90);
    ledger.record(p.clone()).unwrap();
    let before = ledger.running_stats().wins;

    let first = ledger.settle_pick(&p, Outcome::Home, Utc::now()).unwrap();
    assert!(first.is_new());
    let once = ledger.running_stats();
    let second = ledger.settle_pick(&p, Outcome::Home, Utc::now()).unwrap();
    assert!(matches!(second, SettleOutcome::AlreadySettled(_)));
    let twice = ledger.running_stats();

    assert_eq!(twice.wins, before + 1);
    assert_eq!(once, twice);
    assert!((twice.total_profit - 90.0).abs() < 1e-9);
}

#[test]
fn duplicate_result_delivery_is_harmless() {
    let mut ledger = Ledger::new(50.0);
    let p = pick("TeamA", "TeamB", day(21), Selection::HomeWin, 2.0);
    ledger.record(p).unwrap();
    let r = MatchResult {
        home_team: "Team A".to_string(),
        away_team: "Team B".to_string(),
        match_date: day(21),
        home_goals: 2,
        away_goals: 2,
    };
    ledger.reconcile(&[r.clone()], Utc::now()).unwrap();
    let once = ledger.running_stats();
    let again = ledger.reconcile(&[r.clone(), r], Utc::now()).unwrap();
    assert_eq!(again.already_settled, 2);
    assert_eq!(ledger.running_stats(), once);
    assert_eq!(once.losses, 1);
    assert!((once.total_profit + 50.0).abs() < 1e-9);
}

#[test]
fn conflicting_result_is_surfaced_not_applied() {
    let mut ledger = Ledger::new(100.0);
    let p = pick("TeamA", "TeamB", day(21), Selection::HomeWin, 2.0);
    ledger.record(p.clone()).unwrap();
    ledger.settle(&p.key, Outcome::Home, Some((1, 0)), Utc::now()).unwrap();
    let stats = ledger.running_stats();

    let err = ledger.settle(&p.key, Outcome::Home, Some((2, 0)), Utc::now());
    assert!(matches!(err, Err(LedgerError::Conflict(_))));
    let err = ledger.settle(&p.key, Outcome::Draw, None, Utc::now());
    assert!(matches!(err, Err(LedgerError::Conflict(_))));
    assert_eq!(ledger.running_stats(), stats);
}

#[test]
fn stats_do_not_depend_on_settlement_order() {
    let picks: Vec<Pick> = (1..=12)
        .map(|d| {
            let sel = match d % 3 {
                0 => Selection::HomeWin,
                1 => Selection::AwayWin,
                _ => Selection::Draw,
            };
            pick(&format!("H{d}"), &format!("A{d}"), day(d), sel, 1.5 + d as f64 / 10.0)
        })
        .collect();
    let outcome = |d: usize| match d % 4 {
        0 => Outcome::Away,
        1 => Outcome::Draw,
        _ => Outcome::Home,
    };

    let mut forward = Ledger::new(20.0);
    let mut backward = Ledger::new(20.0);
    forward.record_all(picks.iter().cloned()).unwrap();
    backward.record_all(picks.iter().rev().cloned()).unwrap();
    for (i, p) in picks.iter().enumerate() {
        forward.settle(&p.key, outcome(i), None, Utc::now()).unwrap();
    }
    for (i, p) in picks.iter().enumerate().rev() {
        backward.settle(&p.key, outcome(i), None, Utc::now()).unwrap();
    }
    let a = forward.running_stats();
    assert_eq!(a, backward.running_stats());
    assert_eq!(a, forward.running_stats());
    assert_eq!(a.total_bets, 12);
    assert_eq!(a.wins + a.losses, 12);
}

#[test]
fn first_emitted_pick_is_kept() {
    let mut ledger = Ledger::new(100.0);
    let first = pick("TeamA", "TeamB", day(21), Selection::HomeWin, 2.0);
    let mut later = first.clone();
    later.home_team = "team a".to_string();
    later.odds_taken = Some(1.7);
    assert!(ledger.record(first.clone()).unwrap());
    assert!(!ledger.record(later).unwrap());
    assert_eq!(ledger.get(&first.key).unwrap().odds_taken, Some(2.0));
}

#[test]
fn unknown_pick_is_reported() {
    let mut ledger = Ledger::new(100.0);
    let key = PickKey::new("Nobody", "Else", day(1));
    assert!(matches!(
        ledger.settle(&key, Outcome::Home, None, Utc::now()),
        Err(LedgerError::UnknownPick(_))
    ));
}
