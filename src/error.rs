use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("feature mismatch against manifest {manifest}: {detail}")]
    FeatureMismatch { manifest: String, detail: String },

    #[error("ensemble exhausted: all {attempted} members failed to score ({})", reasons.join("; "))]
    EnsembleExhausted {
        attempted: usize,
        reasons: Vec<String>,
    },

    #[error("model artifact unavailable: {0}")]
    Artifact(String),
}

impl PipelineError {
    pub fn feature_mismatch(manifest: &str, detail: impl Into<String>) -> Self {
        Self::FeatureMismatch {
            manifest: manifest.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoreError {
    #[error("expected {expected} features, got {got}")]
    Shape { expected: usize, got: usize },
    #[error("non-finite input at position {0}")]
    NonFinite(usize),
    #[error("model produced an invalid distribution: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationInputError {
    #[error("odds for {selection} must be finite and above 1.0, got {odds}")]
    InvalidOdds { selection: &'static str, odds: f64 },
    #[error("implied probabilities sum to {sum:.4}, outside {min:.2}..={max:.2}")]
    Overround { sum: f64, min: f64, max: f64 },
    #[error("no odds quoted for {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("settlement conflict for {key}: recorded {recorded}, attempted {attempted}")]
pub struct SettlementConflictError {
    pub key: String,
    pub recorded: String,
    pub attempted: String,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Conflict(#[from] SettlementConflictError),
    #[error("no emitted pick for {0}")]
    UnknownPick(String),
    #[error("ledger store: {0}")]
    Store(String),
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}
