use chrono::{NaiveDate, Utc};

use kicklab::artifact::{ArtifactMember, LiveModel, ModelArtifact, Standardizer};
use kicklab::calibration::Calibrator;
use kicklab::edge::BankrollConfig;
use kicklab::ensemble::{ClassPrior, ClassifierModel};
use kicklab::features::DEFAULT_MANIFEST;
use kicklab::market::MarketOdds;
use kicklab::outcome::ClassSet;
use kicklab::pipeline::{PickBatch, PickSettings, generate_picks};
use kicklab::providers::{Fixture, InlineOdds};
use kicklab::team_form::{FormConfig, FormTracker};

fn artifact(members: &[(&str, Vec<f64>)]) -> ModelArtifact {
    let width = DEFAULT_MANIFEST.len();
    ModelArtifact::assemble(
        ClassSet::ThreeWay,
        DEFAULT_MANIFEST.clone(),
        Standardizer::identity(width),
        members
            .iter()
            .map(|(name, probs)| ArtifactMember {
                name: name.to_string(),
                model: ClassifierModel::Prior(ClassPrior {
                    n_features: width,
                    probs: probs.clone(),
                }),
            })
            .collect(),
        None,
        None,
        Utc::now(),
    )
    .unwrap()
}

fn fixtures() -> Vec<Fixture> {
    let d = NaiveDate::from_ymd_opt(2026, 2, 21).unwrap();
    vec![
        Fixture {
            home_team: "TeamA".to_string(),
            away_team: "TeamB".to_string(),
            match_date: d,
            odds: Some(MarketOdds::new(1.60, 4.0, 6.0)),
            travel_km: Some(120.0),
            is_derby: false,
        },
        Fixture {
            home_team: "TeamC".to_string(),
            away_team: "TeamD".to_string(),
            match_date: d,
            odds: None,
            travel_km: None,
            is_derby: true,
        },
    ]
}

fn settings(threshold: f64) -> PickSettings {
    PickSettings {
        calibrator: Calibrator::default(),
        confidence_threshold: threshold,
    }
}

#[test]
fn no_live_model_means_unavailable() {
    let live = LiveModel::empty();
    let tracker = FormTracker::new(FormConfig::default());
    let batch = generate_picks(
        &live,
        &fixtures(),
        &tracker,
        &InlineOdds,
        &settings(0.5),
        &BankrollConfig::default(),
        Utc::now(),
    );
    assert!(matches!(batch, PickBatch::Unavailable { .. }));
    assert!(batch.picks().is_empty());
    assert!(batch.bet_now().is_empty());
}

#[test]
fn picks_carry_edge_and_audit_fields() {
    let live = LiveModel::with(artifact(&[("strong_home", vec![0.85, 0.1, 0.05])]));
    let tracker = FormTracker::new(FormConfig::default());
    let batch = generate_picks(
        &live,
        &fixtures(),
        &tracker,
        &InlineOdds,
        &settings(0.45),
        &BankrollConfig::default(),
        Utc::now(),
    );
    let PickBatch::Ready { picks, skipped, .. } = &batch else {
        panic!("expected a ready batch");
    };
    assert!(skipped.is_empty());
    assert_eq!(picks.len(), 2);

    let priced = picks.iter().find(|p| p.home_team == "TeamA").unwrap();
    assert!((priced.probabilities.sum() - 1.0).abs() < 1e-9);
    assert_eq!(priced.odds_taken, Some(1.60));
    assert!(priced.edge_pct.is_some());
    assert!(!priced.imputed.is_empty(), "cold teams fall back to league averages");

    let unpriced = picks.iter().find(|p| p.home_team == "TeamC").unwrap();
    assert!(unpriced.edge_pct.is_none());
    assert!(unpriced.suggested_stake.is_none());
    assert!(!unpriced.is_bet());

    for p in batch.bet_now() {
        assert!(p.pass_filter);
        assert!((p.suggested_stake.unwrap() - 150.0).abs() < 1e-9);
    }
}

#[test]
fn high_threshold_keeps_picks_for_audit() {
    let live = LiveModel::with(artifact(&[("flat", vec![0.4, 0.3, 0.3])]));
    let tracker = FormTracker::new(FormConfig::default());
    let batch = generate_picks(
        &live,
        &fixtures(),
        &tracker,
        &InlineOdds,
        &settings(0.9),
        &BankrollConfig::default(),
        Utc::now(),
    );
    assert_eq!(batch.picks().len(), 2);
    assert!(batch.picks().iter().all(|p| !p.pass_filter));
    assert!(batch.bet_now().is_empty());
}

#[test]
fn broken_members_are_dropped_or_skip_the_fixture() {
    let tracker = FormTracker::new(FormConfig::default());
    let partly = LiveModel::with(artifact(&[
        ("ok", vec![0.5, 0.3, 0.2]),
        ("nan", vec![f64::NAN, 0.5, 0.5]),
    ]));
    let batch = generate_picks(
        &partly,
        &fixtures(),
        &tracker,
        &InlineOdds,
        &settings(0.5),
        &BankrollConfig::default(),
        Utc::now(),
    );
    assert_eq!(batch.picks().len(), 2);

    let broken = LiveModel::with(artifact(&[("nan", vec![f64::NAN, 0.5, 0.5])]));
    let batch = generate_picks(
        &broken,
        &fixtures(),
        &tracker,
        &InlineOdds,
        &settings(0.5),
        &BankrollConfig::default(),
        Utc::now(),
    );
    let PickBatch::Ready { picks, skipped, .. } = batch else {
        panic!("expected a ready batch");
    };
    assert!(picks.is_empty());
    assert_eq!(skipped.len(), 2);
    assert!(skipped[0].reason.contains("ensemble exhausted"));
}
