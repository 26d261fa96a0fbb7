use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CalibrationInputError;
use crate::market::MarketOdds;
use crate::outcome::{ClassSet, Outcome, OutcomeDist};

pub const DEFAULT_TEMPERATURE: f64 = 2.5;
pub const DEFAULT_MODEL_WEIGHT: f64 = 0.70;
/// Temperatures must soften; `T = 1` would pass raw probabilities through.
pub const MIN_TEMPERATURE: f64 = 1.05;
pub const MAX_TEMPERATURE: f64 = 10.0;

const CLIP_LO: f64 = 0.001;
const CLIP_HI: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    pub fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibrator {
    temperature: f64,
    model_weight: f64,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE, DEFAULT_MODEL_WEIGHT)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calibrated {
    pub dist: OutcomeDist,
    pub tempered: OutcomeDist,
    /// De-margined market distribution, when the quote passed sanity checks.
    pub market: Option<OutcomeDist>,
    pub market_error: Option<CalibrationInputError>,
}

impl Calibrated {
    pub fn is_market_anchored(&self) -> bool {
        self.market.is_some()
    }
}

impl Calibrator {
    pub fn new(temperature: f64, model_weight: f64) -> Self {
        let temperature = if !temperature.is_finite() {
            warn!(temperature, "non-finite temperature, using default");
            DEFAULT_TEMPERATURE
        } else if temperature < MIN_TEMPERATURE {
            warn!(
                temperature,
                floor = MIN_TEMPERATURE,
                "temperature must exceed 1, raised to floor"
            );
            MIN_TEMPERATURE
        } else {
            temperature.min(MAX_TEMPERATURE)
        };
        let model_weight = if model_weight.is_finite() {
            model_weight.clamp(0.0, 1.0)
        } else {
            DEFAULT_MODEL_WEIGHT
        };
        Self {
            temperature,
            model_weight,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn model_weight(&self) -> f64 {
        self.model_weight
    }

    pub fn market_weight(&self) -> f64 {
        1.0 - self.model_weight
    }

    /// Softmax of `ln(p) / T`. For two classes this is `sigmoid(logit(p) / T)`.
    pub fn temperature_scale(&self, raw: &OutcomeDist) -> OutcomeDist {
        let inv_t = 1.0 / self.temperature;
        let logits: Vec<f64> = raw
            .probs()
            .iter()
            .map(|p| p.clamp(CLIP_LO, CLIP_HI).ln() * inv_t)
            .collect();
        let mx = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - mx).exp()).collect();
        OutcomeDist::normalized(raw.classes(), exp)
    }

    pub fn calibrate(&self, raw: &OutcomeDist, market: Option<&MarketOdds>) -> Calibrated {
        let tempered = self.temperature_scale(raw);
        let Some(odds) = market else {
            return Calibrated {
                dist: tempered.clone(),
                tempered,
                market: None,
                market_error: Some(CalibrationInputError::Missing("market odds")),
            };
        };

        match odds.fair_dist(raw.classes()) {
            Ok(fair) => {
                let dist = blend(&tempered, &fair, self.model_weight);
                Calibrated {
                    dist,
                    tempered,
                    market: Some(fair),
                    market_error: None,
                }
            }
            Err(err) => {
                debug!(error = %err, "market quote rejected, using temperature scaling only");
                Calibrated {
                    dist: tempered.clone(),
                    tempered,
                    market: None,
                    market_error: Some(err),
                }
            }
        }
    }
}

/// `w * model + (1 - w) * market`, class by class. Both inputs must share a
/// class set.
pub fn blend(model: &OutcomeDist, market: &OutcomeDist, model_weight: f64) -> OutcomeDist {
    let w = model_weight.clamp(0.0, 1.0);
    let probs = model
        .probs()
        .iter()
        .zip(market.probs())
        .map(|(m, k)| w * m + (1.0 - w) * k)
        .collect();
    OutcomeDist::normalized(model.classes(), probs)
}

pub fn empirical_outcome_probs(outcomes: &[Outcome], classes: ClassSet) -> OutcomeDist {
    if outcomes.is_empty() {
        return OutcomeDist::uniform(classes);
    }
    let mut counts = vec![0.0_f64; classes.len()];
    for outcome in outcomes {
        counts[classes.class_index(*outcome)] += 1.0;
    }
    // Laplace smoothing keeps unseen classes off zero.
    OutcomeDist::normalized(classes, counts.into_iter().map(|c| c + 1.0).collect())
}

pub fn evaluate_probs(predictions: &[OutcomeDist], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let actual_idx = p.classes().class_index(*outcome);
        for (idx, prob) in p.probs().iter().enumerate() {
            let y = if idx == actual_idx { 1.0 } else { 0.0 };
            brier_sum += (prob - y).powi(2);
        }
        log_loss_sum += -p.probs()[actual_idx].clamp(1e-12, 1.0).ln();
        if p.argmax().0.wins(*outcome) {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

/// Grid search over T in 1.1..=6.0 minimising log-loss of the tempered
/// predictions. Used as a training diagnostic; inference keeps the configured
/// temperature.
pub fn fit_temperature(raw: &[OutcomeDist], outcomes: &[Outcome]) -> (f64, Metrics) {
    if raw.is_empty() || raw.len() != outcomes.len() {
        return (DEFAULT_TEMPERATURE, Metrics::empty());
    }

    let mut best_t = 1.1;
    let mut best_metrics = evaluate_tempered(raw, outcomes, best_t);
    for step in 12..=60 {
        let t = step as f64 / 10.0;
        let metrics = evaluate_tempered(raw, outcomes, t);
        if metrics.log_loss < best_metrics.log_loss {
            best_metrics = metrics;
            best_t = t;
        }
    }
    (best_t, best_metrics)
}

fn evaluate_tempered(raw: &[OutcomeDist], outcomes: &[Outcome], temperature: f64) -> Metrics {
    let calibrator = Calibrator::new(temperature, 1.0);
    let tempered: Vec<OutcomeDist> = raw.iter().map(|p| calibrator.temperature_scale(p)).collect();
    evaluate_probs(&tempered, outcomes)
}

/// Reliability bins over (stated confidence, hit) pairs.
pub fn calibration_bins(samples: &[(f64, bool)], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (confidence, hit) in samples {
        let p = confidence.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *hit {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 / total as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub window: usize,
    pub evaluated: usize,
    pub accuracy: f64,
    pub floor: f64,
    pub drifting: bool,
}

/// Accuracy over the newest `window` results (input oldest first). A window
/// that is not yet full never reports drift.
pub fn drift_check(recent_hits: &[bool], window: usize, floor: f64) -> DriftReport {
    let window = window.max(1);
    let tail = &recent_hits[recent_hits.len().saturating_sub(window)..];
    let evaluated = tail.len();
    let accuracy = if evaluated == 0 {
        0.0
    } else {
        tail.iter().filter(|h| **h).count() as f64 / evaluated as f64
    };
    DriftReport {
        window,
        evaluated,
        accuracy,
        floor,
        drifting: evaluated >= window && accuracy < floor,
    }
}

#[cfg(test)]
mod tests {
    use super::{Calibrator, blend, calibration_bins, drift_check, evaluate_probs, fit_temperature};
    use crate::market::MarketOdds;
    use crate::outcome::{ClassSet, Outcome, OutcomeDist, Selection};

    fn dist(classes: ClassSet, p: &[f64]) -> OutcomeDist {
        OutcomeDist::new(classes, p.to_vec()).unwrap()
    }

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let preds = vec![
            dist(ClassSet::ThreeWay, &[1.0, 0.0, 0.0]),
            dist(ClassSet::ThreeWay, &[0.0, 1.0, 0.0]),
            dist(ClassSet::ThreeWay, &[0.0, 0.0, 1.0]),
        ];
        let m = evaluate_probs(&preds, &[Outcome::Home, Outcome::Draw, Outcome::Away]);
        assert_eq!(m.samples, 3);
        assert!(m.brier < 1e-12);
        assert!((m.accuracy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn binary_temperature_matches_logistic_form() {
        let c = Calibrator::new(2.5, 0.7);
        let p: f64 = 0.8;
        let expected = 1.0 / (1.0 + (-(p / (1.0 - p)).ln() / 2.5).exp());
        let q = c.temperature_scale(&dist(ClassSet::HomeVsField, &[1.0 - p, p]));
        assert!((q.get(Selection::HomeWin).unwrap() - expected).abs() < 1e-12);
        assert!(q.get(Selection::HomeWin).unwrap() < p);
    }

    #[test]
    fn bad_market_falls_back_to_tempered() {
        let c = Calibrator::default();
        let raw = dist(ClassSet::ThreeWay, &[0.6, 0.25, 0.15]);
        let out = c.calibrate(&raw, Some(&MarketOdds::new(1.1, 1.1, 1.1)));
        assert!(out.market_error.is_some());
        assert!(!out.is_market_anchored());
        assert_eq!(out.dist, out.tempered);
    }

    #[test]
    fn temperature_never_reaches_identity() {
        let raw = dist(ClassSet::ThreeWay, &[0.7, 0.2, 0.1]);
        for t in [1.0, 0.5, -3.0] {
            let c = Calibrator::new(t, 1.0);
            assert!(c.temperature() > 1.0);
            let scaled = c.temperature_scale(&raw);
            assert!(scaled.get(Selection::HomeWin).unwrap() < 0.7);
        }
        assert_eq!(Calibrator::new(f64::NAN, 0.7).temperature(), 2.5);
        assert_eq!(Calibrator::new(40.0, 0.7).temperature(), 10.0);
    }

    #[test]
    fn blend_weights_sum_to_one() {
        let a = dist(ClassSet::HomeVsField, &[0.2, 0.8]);
        let b = dist(ClassSet::HomeVsField, &[0.5, 0.5]);
        let m = blend(&a, &b, 0.7);
        assert!((m.get(Selection::HomeWin).unwrap() - 0.71).abs() < 1e-12);
    }

    #[test]
    fn temperature_fit_prefers_softening_overconfident_model() {
        // Model says 0.95 home every time; home wins 60%.
        let raw: Vec<OutcomeDist> = (0..100)
            .map(|_| dist(ClassSet::HomeVsField, &[0.05, 0.95]))
            .collect();
        let outcomes: Vec<Outcome> = (0..100)
            .map(|i| if i % 5 < 3 { Outcome::Home } else { Outcome::Away })
            .collect();
        let (t, _) = fit_temperature(&raw, &outcomes);
        assert!(t > 2.0);
    }

    #[test]
    fn bins_and_drift() {
        let bins = calibration_bins(&[(0.62, true), (0.65, false), (0.91, true)], 10);
        assert_eq!(bins[6].count, 2);
        assert!((bins[6].actual_rate - 0.5).abs() < 1e-12);

        let hits = [true, true, false, false, false, false];
        assert!(drift_check(&hits, 4, 0.5).drifting);
        assert!(!drift_check(&hits, 10, 0.5).drifting);
    }
}
