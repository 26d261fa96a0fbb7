use serde::{Deserialize, Serialize};

use crate::error::CalibrationInputError;
use crate::outcome::{ClassSet, OutcomeDist, Selection};

pub const MIN_OVERROUND: f64 = 0.98;
pub const MAX_OVERROUND: f64 = 1.35;

/// Decimal 1X2 prices for one fixture as quoted when the pick was made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

pub fn implied_prob(decimal_odds: f64) -> f64 {
    if decimal_odds.is_finite() && decimal_odds > 0.0 {
        1.0 / decimal_odds
    } else {
        0.0
    }
}

/// American moneyline to decimal odds (+150 -> 2.50, -150 -> 1.667).
pub fn decimal_from_american(line: f64) -> Option<f64> {
    if !line.is_finite() || line.abs() < 100.0 {
        return None;
    }
    if line > 0.0 {
        Some(1.0 + line / 100.0)
    } else {
        Some(1.0 + 100.0 / line.abs())
    }
}

impl MarketOdds {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    pub fn validate(&self) -> Result<(), CalibrationInputError> {
        for (selection, odds) in [("home", self.home), ("draw", self.draw), ("away", self.away)] {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(CalibrationInputError::InvalidOdds { selection, odds });
            }
        }
        let sum = self.overround();
        if !(MIN_OVERROUND..=MAX_OVERROUND).contains(&sum) {
            return Err(CalibrationInputError::Overround {
                sum,
                min: MIN_OVERROUND,
                max: MAX_OVERROUND,
            });
        }
        Ok(())
    }

    pub fn overround(&self) -> f64 {
        implied_prob(self.home) + implied_prob(self.draw) + implied_prob(self.away)
    }

    pub fn margin_pct(&self) -> f64 {
        (self.overround() - 1.0) * 100.0
    }

    /// De-margined home/draw/away probabilities summing to one.
    pub fn fair_probs(&self) -> Result<[f64; 3], CalibrationInputError> {
        self.validate()?;
        let total = self.overround();
        Ok([
            implied_prob(self.home) / total,
            implied_prob(self.draw) / total,
            implied_prob(self.away) / total,
        ])
    }

    pub fn fair_dist(&self, classes: ClassSet) -> Result<OutcomeDist, CalibrationInputError> {
        let [h, d, a] = self.fair_probs()?;
        let probs = match classes {
            ClassSet::ThreeWay => vec![h, d, a],
            ClassSet::HomeVsField => vec![d + a, h],
        };
        // fair_probs validated every price, so the mass is positive and finite.
        OutcomeDist::new(classes, probs).map_err(|_| CalibrationInputError::Overround {
            sum: self.overround(),
            min: MIN_OVERROUND,
            max: MAX_OVERROUND,
        })
    }

    /// Price a bettor would have taken on `selection`. Away/Draw is priced as
    /// the double-chance combination of the draw and away quotes.
    pub fn odds_for(&self, selection: Selection) -> f64 {
        match selection {
            Selection::HomeWin => self.home,
            Selection::Draw => self.draw,
            Selection::AwayWin => self.away,
            Selection::NotHome => {
                let p = implied_prob(self.draw) + implied_prob(self.away);
                if p > 0.0 { 1.0 / p } else { 0.0 }
            }
        }
    }

    /// Raw `1 / odds` for the selection, margin included.
    pub fn implied_for(&self, selection: Selection) -> f64 {
        implied_prob(self.odds_for(selection))
    }

    pub fn draw_share(&self) -> Option<f64> {
        let d = implied_prob(self.draw);
        let a = implied_prob(self.away);
        if d + a > 0.0 { Some(d / (d + a)) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::{MarketOdds, decimal_from_american, implied_prob};
    use crate::outcome::{ClassSet, Selection};

    #[test]
    fn fair_probs_remove_margin() {
        let odds = MarketOdds::new(1.90, 3.50, 4.20);
        assert!(odds.overround() > 1.0);
        let fair = odds.fair_probs().unwrap();
        assert!((fair.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(fair[0] < implied_prob(1.90));
    }

    #[test]
    fn rejects_insane_prices() {
        assert!(MarketOdds::new(1.0, 3.0, 4.0).validate().is_err());
        assert!(MarketOdds::new(f64::NAN, 3.0, 4.0).validate().is_err());
        // 1/1.2 + 1/1.2 + 1/1.2 = 2.5
        assert!(MarketOdds::new(1.2, 1.2, 1.2).validate().is_err());
        // 1/10 * 3 = 0.3
        assert!(MarketOdds::new(10.0, 10.0, 10.0).validate().is_err());
    }

    #[test]
    fn binary_fair_dist_folds_draw_and_away() {
        let odds = MarketOdds::new(2.0, 4.0, 4.0);
        let d = odds.fair_dist(ClassSet::HomeVsField).unwrap();
        assert!((d.get(Selection::HomeWin).unwrap() - 0.5).abs() < 1e-12);
        assert!((d.get(Selection::NotHome).unwrap() - 0.5).abs() < 1e-12);
        assert!((odds.odds_for(Selection::NotHome) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn american_lines() {
        assert!((decimal_from_american(150.0).unwrap() - 2.5).abs() < 1e-12);
        assert!((decimal_from_american(-150.0).unwrap() - (1.0 + 100.0 / 150.0)).abs() < 1e-12);
        assert!((decimal_from_american(100.0).unwrap() - 2.0).abs() < 1e-12);
        assert!(decimal_from_american(50.0).is_none());
    }
}
