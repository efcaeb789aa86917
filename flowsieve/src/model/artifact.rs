// flowsieve/src/model/artifact.rs
//
// The persisted model bundle: five JSON files in one directory.
//
//   traffic_model.json         fitted classifier
//   categorical_encoders.json  FeatureEngineer (encoders + imputation medians)
//   feature_scaler.json        StandardScaler
//   label_encoder.json         ClassLabels
//   model_info.json            metadata + SHA-256 of the other four files
//
// Saving writes a fresh hidden version directory next to `dir`, then points
// `dir` (a symlink) at it with a single rename. The published path never
// disappears, a reader sees either the previous bundle or the new one, and the
// previous version is kept until the next save so an in-flight load can
// finish. A plain directory left at `dir` is replaced once by a two-step
// swap. Loading resolves `dir` once and refuses a bundle whose digests or
// shapes disagree.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{Classifier, ClassLabels, ModelKind, StandardScaler, TrainedModel};
use crate::error::{ArtifactError, InferenceError};
use crate::events::TrafficLabel;
use crate::features::{feature_names, FeatureEngineer, FlowObservation, N_FEATURES};

pub const MODEL_FILE:    &str = "traffic_model.json";
pub const ENCODERS_FILE: &str = "categorical_encoders.json";
pub const SCALER_FILE:   &str = "feature_scaler.json";
pub const LABELS_FILE:   &str = "label_encoder.json";
pub const INFO_FILE:     &str = "model_info.json";

pub const ARTIFACT_FILES: [&str; 5] = [MODEL_FILE, ENCODERS_FILE, SCALER_FILE, LABELS_FILE, INFO_FILE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub best_model:    ModelKind,
    /// Cross-validation mean accuracy of the selected family.
    pub best_score:    f64,
    pub feature_names: Vec<String>,
    pub classes:       Vec<String>,
    pub trained_at:    DateTime<Utc>,
    /// File name → lowercase hex SHA-256 of its bytes.
    #[serde(default)]
    pub digests:       BTreeMap<String, String>,
}

/// One model prediction before category mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label:      TrafficLabel,
    /// Maximum class probability.
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model:    TrainedModel,
    pub features: FeatureEngineer,
    pub scaler:   StandardScaler,
    pub labels:   ClassLabels,
    pub info:     ModelInfo,
}

impl ModelArtifact {
    // ── Inference ─────────────────────────────────────────────────────────────

    pub fn predict_one(&self, obs: &FlowObservation) -> Result<Prediction, InferenceError> {
        self.predict_batch(std::slice::from_ref(obs))?
            .pop()
            .ok_or_else(|| InferenceError::Scoring("empty prediction".into()))
    }

    pub fn predict_batch(&self, rows: &[FlowObservation]) -> Result<Vec<Prediction>, InferenceError> {
        let x = self.features.transform_batch(rows);
        self.predict_matrix(&x)
    }

    fn predict_matrix(&self, x: &Array2<f64>) -> Result<Vec<Prediction>, InferenceError> {
        let scaled = self.scaler.transform(x)?;
        let proba = self.model.predict_proba(&scaled)?;
        proba
            .rows()
            .into_iter()
            .map(|row| {
                let class = super::argmax(row.iter().copied());
                Ok(Prediction { label: self.labels.decode(class)?, confidence: row[class] })
            })
            .collect()
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Atomically replace the bundle at `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        let mut blobs: Vec<(&'static str, Vec<u8>)> = vec![
            (MODEL_FILE,    encode(MODEL_FILE, &self.model)?),
            (ENCODERS_FILE, encode(ENCODERS_FILE, &self.features)?),
            (SCALER_FILE,   encode(SCALER_FILE, &self.scaler)?),
            (LABELS_FILE,   encode(LABELS_FILE, &self.labels)?),
        ];
        let mut info = self.info.clone();
        info.digests = blobs.iter().map(|(name, bytes)| (name.to_string(), sha256_hex(bytes))).collect();
        blobs.push((INFO_FILE, encode(INFO_FILE, &info)?));

        let parent = parent_of(dir);
        std::fs::create_dir_all(&parent).map_err(|source| io_err(&parent, source))?;

        let version = parent.join(version_name(dir));
        std::fs::create_dir(&version).map_err(|source| io_err(&version, source))?;
        for (name, bytes) in &blobs {
            let path = version.join(name);
            if let Err(source) = std::fs::write(&path, bytes) {
                let _ = std::fs::remove_dir_all(&version);
                return Err(io_err(&path, source));
            }
        }

        let previous = std::fs::read_link(dir).ok().and_then(|p| p.file_name().map(|n| n.to_os_string()));
        if let Err(e) = publish(&version, dir) {
            let _ = std::fs::remove_dir_all(&version);
            return Err(e);
        }
        prune_versions(dir, &version, previous.as_deref());
        Ok(())
    }

    /// Load and cross-check a bundle. Any missing file is `Missing`; digest or
    /// shape disagreement is `Inconsistent`. A version pruned while it was
    /// being read is retried against the current one.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let mut attempt = 0;
        loop {
            let resolved = match std::fs::canonicalize(dir) {
                Ok(p) => p,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ArtifactError::Missing { path: dir.to_path_buf() });
                }
                Err(source) => return Err(io_err(dir, source)),
            };
            match Self::load_resolved(dir, &resolved) {
                Err(e) if attempt < LOAD_RETRIES && !resolved.exists() => {
                    debug!(dir = %dir.display(), error = %e, "artifact version replaced during load, retrying");
                    attempt += 1;
                }
                Ok(artifact) => {
                    info!(
                        dir        = %dir.display(),
                        best_model = %artifact.info.best_model,
                        best_score = artifact.info.best_score,
                        classes    = ?artifact.info.classes,
                        "model artifact loaded"
                    );
                    return Ok(artifact);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Files are read from `resolved`; errors name paths under `dir`.
    fn load_resolved(dir: &Path, resolved: &Path) -> Result<Self, ArtifactError> {
        for name in ARTIFACT_FILES {
            if !resolved.join(name).is_file() {
                return Err(ArtifactError::Missing { path: dir.join(name) });
            }
        }

        let info: ModelInfo = decode(INFO_FILE, &read(resolved, INFO_FILE)?)?;
        let verified = |name: &'static str| -> Result<Vec<u8>, ArtifactError> {
            let bytes = read(resolved, name)?;
            let expected = info
                .digests
                .get(name)
                .ok_or_else(|| ArtifactError::Inconsistent(format!("{name} has no recorded digest")))?;
            if sha256_hex(&bytes) != *expected {
                return Err(ArtifactError::Inconsistent(format!("{name} does not match its recorded digest")));
            }
            Ok(bytes)
        };

        let artifact = Self {
            model:    decode(MODEL_FILE, &verified(MODEL_FILE)?)?,
            features: decode(ENCODERS_FILE, &verified(ENCODERS_FILE)?)?,
            scaler:   decode(SCALER_FILE, &verified(SCALER_FILE)?)?,
            labels:   decode(LABELS_FILE, &verified(LABELS_FILE)?)?,
            info,
        };
        artifact.check_consistency()?;
        Ok(artifact)
    }

    pub fn check_consistency(&self) -> Result<(), ArtifactError> {
        let fail = |msg: String| Err(ArtifactError::Inconsistent(msg));
        if self.info.feature_names != feature_names() {
            return fail(format!("feature names {:?} do not match this build", self.info.feature_names));
        }
        if !self.features.matches_layout() {
            return fail("categorical encoder bundle has the wrong imputation width".into());
        }
        if self.scaler.n_features() != N_FEATURES {
            return fail(format!("scaler expects {} features, not {}", self.scaler.n_features(), N_FEATURES));
        }
        if self.labels.names() != self.info.classes {
            return fail(format!("label encoder {:?} vs metadata {:?}", self.labels.names(), self.info.classes));
        }
        if self.model.n_classes() != self.labels.len() {
            return fail(format!("model has {} classes, label encoder {}", self.model.n_classes(), self.labels.len()));
        }
        Ok(())
    }
}

// ── File helpers ──────────────────────────────────────────────────────────────

const LOAD_RETRIES: usize = 3;

static VERSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn encode<T: Serialize>(file: &'static str, value: &T) -> Result<Vec<u8>, ArtifactError> {
    serde_json::to_vec(value).map_err(|source| ArtifactError::Encode { file, source })
}

fn decode<T: DeserializeOwned>(file: &'static str, bytes: &[u8]) -> Result<T, ArtifactError> {
    serde_json::from_slice(bytes).map_err(|source| ArtifactError::Decode { file, source })
}

fn read(dir: &Path, name: &str) -> Result<Vec<u8>, ArtifactError> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|source| io_err(&path, source))
}

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io { path: path.to_path_buf(), source }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

fn parent_of(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "models".into())
}

/// `.<name>.v<utc timestamp>-<pid>-<seq>`, unique per save.
fn version_name(dir: &Path) -> String {
    format!(
        ".{}.v{}-{}-{}",
        dir_name(dir),
        Utc::now().format("%Y%m%dT%H%M%S%6f"),
        std::process::id(),
        VERSION_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Point `dir` at `version`. Over an existing symlink (or nothing) this is
/// one rename.
#[cfg(unix)]
fn publish(version: &Path, dir: &Path) -> Result<(), ArtifactError> {
    let target = version.file_name().map(PathBuf::from).unwrap_or_else(|| version.to_path_buf());
    let link = parent_of(dir).join(format!(".{}.link-{}", dir_name(dir), std::process::id()));
    if std::fs::symlink_metadata(&link).is_ok() {
        std::fs::remove_file(&link).map_err(|source| io_err(&link, source))?;
    }
    std::os::unix::fs::symlink(&target, &link).map_err(|source| io_err(&link, source))?;

    let is_plain_dir = std::fs::symlink_metadata(dir).map(|m| m.is_dir()).unwrap_or(false);
    let result = if is_plain_dir { replace_plain_dir(&link, dir) } else {
        std::fs::rename(&link, dir).map_err(|source| io_err(dir, source))
    };
    if result.is_err() {
        let _ = std::fs::remove_file(&link);
    }
    result
}

#[cfg(not(unix))]
fn publish(version: &Path, dir: &Path) -> Result<(), ArtifactError> {
    if std::fs::symlink_metadata(dir).is_err() {
        return std::fs::rename(version, dir).map_err(|source| io_err(dir, source));
    }
    replace_plain_dir(version, dir)
}

/// Two-step swap for a real directory at `dir`. `dir` is briefly absent.
fn replace_plain_dir(replacement: &Path, dir: &Path) -> Result<(), ArtifactError> {
    let backup = parent_of(dir).join(format!(".{}.previous-{}", dir_name(dir), std::process::id()));
    if backup.exists() {
        std::fs::remove_dir_all(&backup).map_err(|source| io_err(&backup, source))?;
    }
    std::fs::rename(dir, &backup).map_err(|source| io_err(dir, source))?;
    if let Err(source) = std::fs::rename(replacement, dir) {
        if let Err(e) = std::fs::rename(&backup, dir) {
            warn!(error = %e, backup = %backup.display(), "failed to restore previous artifact");
        }
        return Err(io_err(dir, source));
    }
    if let Err(e) = std::fs::remove_dir_all(&backup) {
        warn!(error = %e, backup = %backup.display(), "stale artifact backup left behind");
    }
    Ok(())
}

/// Remove version directories other than `current` and the one `dir`
/// pointed at before this save.
fn prune_versions(dir: &Path, current: &Path, previous: Option<&OsStr>) {
    let prefix = format!(".{}.v", dir_name(dir));
    let parent = parent_of(dir);
    let Ok(entries) = std::fs::read_dir(&parent) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix)
            || Some(name.as_os_str()) == current.file_name()
            || Some(name.as_os_str()) == previous
        {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(entry.path()) {
            warn!(error = %e, path = %entry.path().display(), "stale artifact version left behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingSettings;
    use crate::model::{ModelKind, ModelTrainer};
    use crate::synth::SyntheticDataGenerator;

    fn trained() -> ModelArtifact {
        let rows = SyntheticDataGenerator::new(5).generate_dataset(240);
        ModelTrainer::new(TrainingSettings::default())
            .with_roster(vec![ModelKind::Svm, ModelKind::LogisticRegression])
            .train(&rows)
            .unwrap()
            .artifact
    }

    fn hidden_entries(parent: &Path) -> Vec<String> {
        std::fs::read_dir(parent)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        trained().save(&target).unwrap();
        std::fs::remove_file(target.join(SCALER_FILE)).unwrap();
        match ModelArtifact::load(&target) {
            Err(ArtifactError::Missing { path }) => assert_eq!(path, target.join(SCALER_FILE)),
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn serialization_failure_is_an_encode_error() {
        let unencodable: BTreeMap<(u8, u8), u8> = [((1, 2), 3)].into_iter().collect();
        match encode(MODEL_FILE, &unencodable) {
            Err(ArtifactError::Encode { file, .. }) => assert_eq!(file, MODEL_FILE),
            other => panic!("expected Encode, got {other:?}"),
        }
    }

    #[test]
    fn absent_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ModelArtifact::load(&dir.path().join("nope")), Err(ArtifactError::Missing { .. })));
    }

    #[test]
    fn tampered_blob_is_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        trained().save(&target).unwrap();
        std::fs::write(target.join(LABELS_FILE), br#"{"classes":["Normal","DDoS"]}"#).unwrap();
        assert!(matches!(ModelArtifact::load(&target), Err(ArtifactError::Inconsistent(_))));
    }

    #[test]
    fn save_replaces_previous_bundle_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        let a = trained();
        a.save(&target).unwrap();
        std::fs::write(target.join("stale.txt"), b"old").unwrap();
        a.save(&target).unwrap();
        a.save(&target).unwrap();

        assert!(!target.join("stale.txt").exists());
        let hidden = hidden_entries(dir.path());
        assert_eq!(hidden.len(), 2, "current and previous version only: {hidden:?}");
        assert!(hidden.iter().all(|n| n.starts_with(".models.v")));
        assert!(ModelArtifact::load(&target).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn published_path_is_a_symlink_to_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        trained().save(&target).unwrap();
        assert!(std::fs::symlink_metadata(&target).unwrap().file_type().is_symlink());
        let link = std::fs::read_link(&target).unwrap();
        assert!(link.to_string_lossy().starts_with(".models.v"));
    }

    #[cfg(unix)]
    #[test]
    fn plain_directory_is_replaced_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("legacy.txt"), b"x").unwrap();

        trained().save(&target).unwrap();
        assert!(std::fs::symlink_metadata(&target).unwrap().file_type().is_symlink());
        assert!(!target.join("legacy.txt").exists());
        assert_eq!(hidden_entries(dir.path()).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn loads_during_saves_never_see_a_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        let a = trained();
        a.save(&target).unwrap();

        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let (target, done) = (target.clone(), done.clone());
            std::thread::spawn(move || {
                let mut loads = 0;
                while !done.load(Ordering::Relaxed) || loads == 0 {
                    if let Err(e) = ModelArtifact::load(&target) {
                        return Err(e.to_string());
                    }
                    loads += 1;
                }
                Ok(loads)
            })
        };
        for _ in 0..10 {
            a.save(&target).unwrap();
        }
        done.store(true, Ordering::Relaxed);
        let loads = reader.join().unwrap().unwrap();
        assert!(loads > 0);
    }
}
