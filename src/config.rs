use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::calibration::{
    Calibrator, DEFAULT_MODEL_WEIGHT, DEFAULT_TEMPERATURE, MAX_TEMPERATURE, MIN_TEMPERATURE,
};
use crate::edge::BankrollConfig;

const CACHE_DIR: &str = "kicklab";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub temperature: f64,
    pub model_weight: f64,
    pub confidence_threshold: f64,
    pub flat_stake: f64,
    pub bankroll: BankrollConfig,
    pub max_artifact_age_days: f64,
    pub drift_window: usize,
    pub drift_accuracy_floor: f64,
    pub retrain_poll: Duration,
    pub artifact_dir: PathBuf,
    pub history_db: PathBuf,
    pub ledger_db: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = app_cache_dir().unwrap_or_else(|| PathBuf::from(".kicklab"));
        Self {
            temperature: DEFAULT_TEMPERATURE,
            model_weight: DEFAULT_MODEL_WEIGHT,
            confidence_threshold: 0.60,
            flat_stake: 100.0,
            bankroll: BankrollConfig::default(),
            max_artifact_age_days: 7.0,
            drift_window: 50,
            drift_accuracy_floor: 0.50,
            retrain_poll: Duration::from_secs(3600),
            artifact_dir: base.join("artifacts"),
            history_db: base.join("history.sqlite"),
            ledger_db: base.join("ledger.sqlite"),
        }
    }
}

impl EngineConfig {
    /// Reads `.env.local` then `.env`, then `KICKLAB_*` variables. Unset or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        let d = Self::default();
        Self {
            temperature: env_f64("KICKLAB_TEMPERATURE", d.temperature)
                .clamp(MIN_TEMPERATURE, MAX_TEMPERATURE),
            model_weight: env_f64("KICKLAB_MODEL_WEIGHT", d.model_weight).clamp(0.0, 1.0),
            confidence_threshold: env_f64("KICKLAB_CONFIDENCE_THRESHOLD", d.confidence_threshold)
                .clamp(0.34, 0.95),
            flat_stake: env_f64("KICKLAB_STAKE", d.flat_stake).max(0.01),
            bankroll: BankrollConfig {
                bankroll: env_f64("KICKLAB_BANKROLL", d.bankroll.bankroll).max(0.0),
                stake_fraction: env_f64("KICKLAB_STAKE_FRACTION", d.bankroll.stake_fraction)
                    .clamp(0.0, 0.25),
            },
            max_artifact_age_days: env_f64("KICKLAB_MAX_ARTIFACT_AGE_DAYS", d.max_artifact_age_days)
                .clamp(0.0, 365.0),
            drift_window: env::var("KICKLAB_DRIFT_WINDOW")
                .ok()
                .and_then(|val| val.trim().parse::<usize>().ok())
                .unwrap_or(d.drift_window)
                .clamp(5, 10_000),
            drift_accuracy_floor: env_f64("KICKLAB_DRIFT_ACCURACY_FLOOR", d.drift_accuracy_floor)
                .clamp(0.0, 1.0),
            retrain_poll: Duration::from_secs(
                env::var("KICKLAB_RETRAIN_POLL_SECS")
                    .ok()
                    .and_then(|val| val.trim().parse::<u64>().ok())
                    .unwrap_or(d.retrain_poll.as_secs())
                    .max(10),
            ),
            artifact_dir: env_path("KICKLAB_ARTIFACT_DIR").unwrap_or(d.artifact_dir),
            history_db: env_path("KICKLAB_HISTORY_DB").unwrap_or(d.history_db),
            ledger_db: env_path("KICKLAB_LEDGER_DB").unwrap_or(d.ledger_db),
        }
    }

    pub fn calibrator(&self) -> Calibrator {
        Calibrator::new(self.temperature, self.model_weight)
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key).ok().and_then(|val| {
        if val.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(val.trim()))
        }
    })
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}
