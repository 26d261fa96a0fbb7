use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kicklab::calibration::{Calibrator, blend};
use kicklab::edge::evaluate;
use kicklab::ensemble::{ClassPrior, ScoringMember, combine};
use kicklab::market::MarketOdds;
use kicklab::outcome::{ClassSet, OutcomeDist, Selection};

fn random_dist(rng: &mut StdRng, classes: ClassSet) -> OutcomeDist {
    let raw: Vec<f64> = (0..classes.len()).map(|_| rng.gen_range(0.001..1.0)).collect();
    let sum: f64 = raw.iter().sum();
    OutcomeDist::new(classes, raw.iter().map(|p| p / sum).collect()).unwrap()
}

fn random_odds(rng: &mut StdRng) -> MarketOdds {
    let p = [rng.gen_range(0.15..0.7), rng.gen_range(0.15..0.35), rng.gen_range(0.1..0.6)];
    let sum: f64 = p.iter().sum();
    let margin = rng.gen_range(1.0..1.1);
    MarketOdds::new(sum / (p[0] * margin), sum / (p[1] * margin), sum / (p[2] * margin))
}

#[test]
fn calibrated_outputs_are_distributions() {
    let mut rng = StdRng::seed_from_u64(7);
    for classes in [ClassSet::ThreeWay, ClassSet::HomeVsField] {
        for _ in 0..500 {
            let raw = random_dist(&mut rng, classes);
            let c = Calibrator::new(rng.gen_range(1.05..6.0), rng.gen_range(0.0..=1.0));
            let odds = random_odds(&mut rng);
            for out in [c.calibrate(&raw, None).dist, c.calibrate(&raw, Some(&odds)).dist] {
                assert!(out.probs().iter().all(|p| (0.0..=1.0).contains(p)));
                assert!((out.sum() - 1.0).abs() < 1e-6);
            }
        }
    }
}

#[test]
fn temperature_scaling_preserves_ranking() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..500 {
        let raw = random_dist(&mut rng, ClassSet::ThreeWay);
        let t = rng.gen_range(1.05..10.0);
        let scaled = Calibrator::new(t, 1.0).temperature_scale(&raw);
        let (r, s) = (raw.probs(), scaled.probs());
        for i in 0..3 {
            for j in 0..3 {
                // Ranking is only defined inside the clipping band.
                if r[i] > r[j] && r[j] >= 0.001 && r[i] <= 0.999 {
                    assert!(s[i] > s[j], "T={t} raw={r:?} scaled={s:?}");
                }
            }
        }
        // Softer, never sharper.
        assert!(scaled.argmax().1 <= raw.argmax().1 + 1e-12);
    }
}

#[test]
fn blend_lies_between_model_and_market() {
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..500 {
        let raw = random_dist(&mut rng, ClassSet::ThreeWay);
        let odds = random_odds(&mut rng);
        let w = rng.gen_range(0.0..=1.0);
        let c = Calibrator::new(2.5, w);
        let out = c.calibrate(&raw, Some(&odds));
        let market = out.market.clone().expect("sane odds anchor the blend");
        for ((b, t), m) in out.dist.probs().iter().zip(out.tempered.probs()).zip(market.probs()) {
            let (lo, hi) = if t < m { (t, m) } else { (m, t) };
            assert!(*b >= lo - 1e-9 && *b <= hi + 1e-9);
        }
    }
}

#[test]
fn blend_weights_are_exact() {
    let model = OutcomeDist::new(ClassSet::HomeVsField, vec![0.2, 0.8]).unwrap();
    let market = OutcomeDist::new(ClassSet::HomeVsField, vec![0.5, 0.5]).unwrap();
    let b = blend(&model, &market, 0.7);
    assert!((b.get(Selection::HomeWin).unwrap() - 0.71).abs() < 1e-12);
}

#[test]
fn insane_market_falls_back_to_temperature_only() {
    let raw = OutcomeDist::new(ClassSet::ThreeWay, vec![0.6, 0.25, 0.15]).unwrap();
    let c = Calibrator::default();
    let out = c.calibrate(&raw, Some(&MarketOdds::new(1.2, 1.3, 1.4)));
    assert!(out.market.is_none());
    assert!(out.market_error.is_some());
    assert_eq!(out.dist, out.tempered);
}

#[test]
fn edge_scenario_at_even_money() {
    let calibrated = OutcomeDist::new(ClassSet::ThreeWay, vec![0.60, 0.25, 0.15]).unwrap();
    let odds = MarketOdds::new(2.00, 3.60, 5.50);
    let d = evaluate(&calibrated, Some(&odds), 0.55);
    assert_eq!(d.prediction, Selection::HomeWin);
    assert!((d.market_implied.unwrap() - 0.50).abs() < 1e-12);
    assert!((d.edge_pct.unwrap() - 10.0).abs() < 1e-9);
    assert!(d.pass_filter);
}

#[test]
fn equal_weight_ensemble_scenario() {
    let a = ClassPrior {
        n_features: 3,
        probs: vec![0.8, 0.2],
    };
    let b = ClassPrior {
        n_features: 3,
        probs: vec![0.6, 0.4],
    };
    let members = [
        ScoringMember { name: "a", model: &a, weight: 1.0 },
        ScoringMember { name: "b", model: &b, weight: 1.0 },
    ];
    let out = combine(&members, &[0.0, 0.0, 0.0], ClassSet::HomeVsField).unwrap();
    let p = out.dist.probs();
    assert!((p[0] - 0.7).abs() < 1e-12);
    assert!((p[1] - 0.3).abs() < 1e-12);
    assert_eq!(out.contributors, 2);
}

#[test]
fn one_failing_member_is_dropped() {
    let good = ClassPrior {
        n_features: 2,
        probs: vec![0.3, 0.7],
    };
    let wide = ClassPrior {
        n_features: 5,
        probs: vec![0.9, 0.1],
    };
    let members = [
        ScoringMember { name: "good", model: &good, weight: 0.5 },
        ScoringMember { name: "wide", model: &wide, weight: 0.5 },
    ];
    let out = combine(&members, &[1.0, 2.0], ClassSet::HomeVsField).unwrap();
    assert_eq!(out.contributors, 1);
    assert_eq!(out.failures[0].member, "wide");
    assert!((out.dist.probs()[1] - 0.7).abs() < 1e-12);

    let only_bad = [ScoringMember { name: "wide", model: &wide, weight: 1.0 }];
    assert!(combine(&only_bad, &[1.0, 2.0], ClassSet::HomeVsField).is_err());
}
