use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::calibration::Metrics;
use crate::ensemble::{Classifier, ClassifierModel};
use crate::error::PipelineError;
use crate::features::FeatureManifest;
use crate::outcome::ClassSet;

const ARTIFACT_FORMAT: &str = "kicklab-artifact";
const ARTIFACT_VERSION: u32 = 1;
const LIVE_POINTER: &str = "LIVE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    pub fn identity(n: usize) -> Self {
        Self {
            means: vec![0.0; n],
            stds: vec![1.0; n],
        }
    }

    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.is_empty() {
            return Self::identity(n_features);
        }
        let n = rows.len() as f64;
        let mut means = vec![0.0_f64; n_features];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut vars = vec![0.0_f64; n_features];
        for row in rows {
            for ((s, v), m) in vars.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        let stds = vars
            .into_iter()
            .map(|v| if v.sqrt() > 1e-9 { v.sqrt() } else { 1.0 })
            .collect();
        Self { means, stds }
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMember {
    pub name: String,
    pub model: ClassifierModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub corpus: String,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub holdout: Option<Metrics>,
    pub member_holdout: Vec<(String, Metrics)>,
    pub fitted_temperature: Option<f64>,
}

/// Immutable, versioned model bundle. Never edited after `assemble`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub classes: ClassSet,
    pub manifest: FeatureManifest,
    pub standardizer: Standardizer,
    pub members: Vec<ArtifactMember>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
    #[serde(default)]
    pub training: Option<TrainingSummary>,
}

impl ModelArtifact {
    pub fn assemble(
        classes: ClassSet,
        manifest: FeatureManifest,
        standardizer: Standardizer,
        members: Vec<ArtifactMember>,
        weights: Option<Vec<f64>>,
        training: Option<TrainingSummary>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let mut hasher = Sha256::new();
        hasher.update(manifest.fingerprint().as_bytes());
        hasher.update(created_at.timestamp_micros().to_le_bytes());
        for m in &members {
            hasher.update(m.name.as_bytes());
            hasher.update(m.model.kind().as_bytes());
        }
        if let Some(w) = &weights {
            for v in w {
                hasher.update(v.to_le_bytes());
            }
        }
        let digest = hex(&hasher.finalize());
        let artifact = Self {
            id: format!("{}-{}", created_at.format("%Y%m%d-%H%M%S"), &digest[..8]),
            created_at,
            classes,
            manifest,
            standardizer,
            members,
            weights,
            training,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.manifest.validate()?;
        let width = self.manifest.len();
        if self.members.is_empty() {
            return Err(PipelineError::Artifact(format!("{} has no members", self.id)));
        }
        if self.standardizer.len() != width {
            return Err(PipelineError::Artifact(format!(
                "{}: standardizer covers {} features, manifest lists {width}",
                self.id,
                self.standardizer.len()
            )));
        }
        for m in &self.members {
            if m.model.n_features() != width {
                return Err(PipelineError::Artifact(format!(
                    "{}: member {} expects {} features, manifest lists {width}",
                    self.id,
                    m.name,
                    m.model.n_features()
                )));
            }
            if m.model.n_classes() != self.classes.len() {
                return Err(PipelineError::Artifact(format!(
                    "{}: member {} scores {} classes, artifact declares {}",
                    self.id,
                    m.name,
                    m.model.n_classes(),
                    self.classes.len()
                )));
            }
            if let Some(idx) = m.model.max_feature_index()
                && idx >= width
            {
                return Err(PipelineError::Artifact(format!(
                    "{}: member {} splits on feature {idx} beyond manifest",
                    self.id, m.name
                )));
            }
        }
        if let Some(w) = &self.weights
            && w.len() != self.members.len()
        {
            return Err(PipelineError::Artifact(format!(
                "{}: {} weights for {} members",
                self.id,
                w.len(),
                self.members.len()
            )));
        }
        Ok(())
    }

    /// Normalised member weights. Missing or unusable weights mean `1/n` each.
    pub fn effective_weights(&self) -> Vec<f64> {
        let n = self.members.len();
        let equal = vec![1.0 / n.max(1) as f64; n];
        let Some(w) = &self.weights else {
            return equal;
        };
        if w.len() != n || w.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return equal;
        }
        let sum: f64 = w.iter().sum();
        if sum <= 0.0 {
            return equal;
        }
        w.iter().map(|v| v / sum).collect()
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 86_400.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    sha256: String,
    body: String,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn checksum(body: &str) -> String {
    hex(&Sha256::digest(body.as_bytes()))
}

pub fn save_artifact(path: &Path, artifact: &ModelArtifact) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let body = serde_json::to_string(artifact).context("serialize artifact")?;
    let envelope = Envelope {
        format: ARTIFACT_FORMAT.to_string(),
        version: ARTIFACT_VERSION,
        sha256: checksum(&body),
        body,
    };
    let json = serde_json::to_string(&envelope).context("serialize envelope")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

pub fn load_artifact(path: &Path) -> Result<ModelArtifact, PipelineError> {
    let fail = |detail: String| PipelineError::Artifact(format!("{}: {detail}", path.display()));
    let raw = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let envelope: Envelope =
        serde_json::from_str(&raw).map_err(|e| fail(format!("bad envelope: {e}")))?;
    if envelope.format != ARTIFACT_FORMAT {
        return Err(fail(format!("unknown format {}", envelope.format)));
    }
    if envelope.version != ARTIFACT_VERSION {
        return Err(fail(format!("unsupported version {}", envelope.version)));
    }
    if checksum(&envelope.body) != envelope.sha256 {
        return Err(fail("checksum mismatch".to_string()));
    }
    let artifact: ModelArtifact =
        serde_json::from_str(&envelope.body).map_err(|e| fail(format!("bad body: {e}")))?;
    artifact.validate()?;
    Ok(artifact)
}

/// Directory of artifact files plus a `LIVE` pointer naming the promoted one.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        let path = self.path_for(&artifact.id);
        save_artifact(&path, artifact)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<ModelArtifact, PipelineError> {
        load_artifact(&self.path_for(id))
    }

    pub fn live_id(&self) -> Result<Option<String>> {
        let path = self.dir.join(LIVE_POINTER);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let id = raw.trim();
        Ok(if id.is_empty() { None } else { Some(id.to_string()) })
    }

    /// `Ok(None)` when nothing was ever promoted. A pointer to a missing or
    /// corrupt file is an error, never a silent fallback.
    pub fn load_live(&self) -> Result<Option<ModelArtifact>, PipelineError> {
        let id = self
            .live_id()
            .map_err(|e| PipelineError::Artifact(format!("{e:#}")))?;
        match id {
            Some(id) => self.load(&id).map(Some),
            None => Ok(None),
        }
    }

    pub fn promote(&self, id: &str) -> Result<()> {
        // Verify before pointing at it.
        self.load(id).map_err(anyhow::Error::new)?;
        fs::create_dir_all(&self.dir).with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.dir.join(LIVE_POINTER);
        let tmp = self.dir.join(format!("{LIVE_POINTER}.tmp"));
        fs::write(&tmp, id).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename into {}", path.display()))?;
        info!(artifact = id, "promoted to live");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// The single owner of the artifact used by live inference. Readers clone the
/// `Arc` and keep scoring against it even while a swap happens.
#[derive(Debug, Default)]
pub struct LiveModel {
    slot: RwLock<Option<Arc<ModelArtifact>>>,
}

impl LiveModel {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(artifact: ModelArtifact) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(artifact))),
        }
    }

    pub fn current(&self) -> Option<Arc<ModelArtifact>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn swap(&self, artifact: ModelArtifact) -> Option<Arc<ModelArtifact>> {
        let next = Arc::new(artifact);
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.replace(next)
    }
}
