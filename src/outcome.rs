use std::fmt;

use serde::{Deserialize, Serialize};

pub const PROB_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Home => "Home Win",
            Outcome::Draw => "Draw",
            Outcome::Away => "Away Win",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase().replace([' ', '_', '-'], "");
        match key.as_str() {
            "h" | "1" | "home" | "homewin" => Some(Outcome::Home),
            "d" | "x" | "draw" => Some(Outcome::Draw),
            "a" | "2" | "away" | "awaywin" => Some(Outcome::Away),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn classify_outcome(home_goals: i32, away_goals: i32) -> Outcome {
    if home_goals > away_goals {
        Outcome::Home
    } else if home_goals < away_goals {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

/// A predicted class. `NotHome` only exists for binary (home vs field) models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    HomeWin,
    Draw,
    AwayWin,
    NotHome,
}

impl Selection {
    pub fn label(self) -> &'static str {
        match self {
            Selection::HomeWin => "Home Win",
            Selection::Draw => "Draw",
            Selection::AwayWin => "Away Win",
            Selection::NotHome => "Away/Draw",
        }
    }

    pub fn wins(self, actual: Outcome) -> bool {
        match self {
            Selection::HomeWin => actual == Outcome::Home,
            Selection::Draw => actual == Outcome::Draw,
            Selection::AwayWin => actual == Outcome::Away,
            Selection::NotHome => actual != Outcome::Home,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassSet {
    /// Index order: home, draw, away.
    ThreeWay,
    /// Index order: not-home, home.
    HomeVsField,
}

impl ClassSet {
    pub fn len(self) -> usize {
        self.selections().len()
    }

    pub fn selections(self) -> &'static [Selection] {
        match self {
            ClassSet::ThreeWay => &[Selection::HomeWin, Selection::Draw, Selection::AwayWin],
            ClassSet::HomeVsField => &[Selection::NotHome, Selection::HomeWin],
        }
    }

    pub fn from_len(n: usize) -> Option<Self> {
        match n {
            3 => Some(ClassSet::ThreeWay),
            2 => Some(ClassSet::HomeVsField),
            _ => None,
        }
    }

    pub fn class_index(self, actual: Outcome) -> usize {
        match (self, actual) {
            (ClassSet::ThreeWay, Outcome::Home) => 0,
            (ClassSet::ThreeWay, Outcome::Draw) => 1,
            (ClassSet::ThreeWay, Outcome::Away) => 2,
            (ClassSet::HomeVsField, Outcome::Home) => 1,
            (ClassSet::HomeVsField, _) => 0,
        }
    }

    pub fn index_of(self, selection: Selection) -> Option<usize> {
        self.selections().iter().position(|s| *s == selection)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDist {
    classes: ClassSet,
    probs: Vec<f64>,
}

impl OutcomeDist {
    /// Builds a distribution, renormalising the input. Rejects wrong arity,
    /// negative or non-finite entries and all-zero mass.
    pub fn new(classes: ClassSet, probs: Vec<f64>) -> Result<Self, String> {
        if probs.len() != classes.len() {
            return Err(format!(
                "expected {} class probabilities, got {}",
                classes.len(),
                probs.len()
            ));
        }
        if let Some(bad) = probs.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(format!("invalid probability {bad}"));
        }
        let sum: f64 = probs.iter().sum();
        if sum <= 0.0 {
            return Err("distribution has zero mass".to_string());
        }
        let probs = probs.into_iter().map(|p| p / sum).collect();
        Ok(Self { classes, probs })
    }

    // Callers guarantee arity and strictly positive finite mass.
    pub(crate) fn normalized(classes: ClassSet, probs: Vec<f64>) -> Self {
        let sum: f64 = probs.iter().sum();
        let probs = probs.into_iter().map(|p| p / sum).collect();
        Self { classes, probs }
    }

    pub fn uniform(classes: ClassSet) -> Self {
        let n = classes.len();
        Self {
            classes,
            probs: vec![1.0 / n as f64; n],
        }
    }

    pub fn classes(&self) -> ClassSet {
        self.classes
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn sum(&self) -> f64 {
        self.probs.iter().sum()
    }

    pub fn get(&self, selection: Selection) -> Option<f64> {
        self.classes.index_of(selection).map(|idx| self.probs[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Selection, f64)> + '_ {
        self.classes
            .selections()
            .iter()
            .copied()
            .zip(self.probs.iter().copied())
    }

    /// Highest-probability class; ties resolve to the earlier index.
    pub fn argmax(&self) -> (Selection, f64) {
        let mut best = 0usize;
        for (idx, p) in self.probs.iter().enumerate() {
            if *p > self.probs[best] {
                best = idx;
            }
        }
        (self.classes.selections()[best], self.probs[best])
    }

    pub fn prob_of_outcome(&self, actual: Outcome) -> f64 {
        self.probs[self.classes.class_index(actual)]
    }

    /// Splits the not-home mass of a binary distribution into draw and away.
    pub fn expand_three_way(&self, draw_share: f64) -> OutcomeDist {
        match self.classes {
            ClassSet::ThreeWay => self.clone(),
            ClassSet::HomeVsField => {
                let share = draw_share.clamp(0.0, 1.0);
                let rest = self.probs[0];
                OutcomeDist {
                    classes: ClassSet::ThreeWay,
                    probs: vec![self.probs[1], rest * share, rest * (1.0 - share)],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassSet, Outcome, OutcomeDist, Selection, classify_outcome};

    #[test]
    fn new_renormalises() {
        let d = OutcomeDist::new(ClassSet::ThreeWay, vec![2.0, 1.0, 1.0]).unwrap();
        assert!((d.sum() - 1.0).abs() < 1e-12);
        assert!((d.get(Selection::HomeWin).unwrap() - 0.5).abs() < 1e-12);
        assert!(d.get(Selection::NotHome).is_none());
    }

    #[test]
    fn rejects_wrong_arity_and_negative_mass() {
        assert!(OutcomeDist::new(ClassSet::HomeVsField, vec![0.2, 0.3, 0.5]).is_err());
        assert!(OutcomeDist::new(ClassSet::HomeVsField, vec![-0.2, 1.2]).is_err());
        assert!(OutcomeDist::new(ClassSet::HomeVsField, vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn binary_selection_semantics() {
        assert!(Selection::NotHome.wins(Outcome::Draw));
        assert!(Selection::NotHome.wins(Outcome::Away));
        assert!(!Selection::NotHome.wins(Outcome::Home));
        let d = OutcomeDist::new(ClassSet::HomeVsField, vec![0.35, 0.65]).unwrap();
        assert_eq!(d.argmax().0, Selection::HomeWin);
        assert!((d.prob_of_outcome(Outcome::Draw) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn expand_keeps_mass() {
        let d = OutcomeDist::new(ClassSet::HomeVsField, vec![0.4, 0.6]).unwrap();
        let e = d.expand_three_way(0.25);
        assert_eq!(e.classes(), ClassSet::ThreeWay);
        assert!((e.sum() - 1.0).abs() < 1e-12);
        assert!((e.get(Selection::Draw).unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn outcome_parsing_and_classification() {
        assert_eq!(Outcome::parse("Home Win"), Some(Outcome::Home));
        assert_eq!(Outcome::parse("x"), Some(Outcome::Draw));
        assert_eq!(Outcome::parse("away_win"), Some(Outcome::Away));
        assert_eq!(Outcome::parse("void"), None);
        assert_eq!(classify_outcome(0, 0), Outcome::Draw);
        assert_eq!(classify_outcome(1, 3), Outcome::Away);
    }
}
