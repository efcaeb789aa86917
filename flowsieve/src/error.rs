// flowsieve/src/error.rs
//
// Error taxonomy. Only ConfigError, ArtifactError, TrainingError and DatasetError reach
// a caller; InferenceError and RuleError are recovered inside the engine.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Model artifact missing or unusable at engine construction / training save.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact file missing: {}", path.display())]
    Missing { path: PathBuf },

    #[error("artifact files are inconsistent: {0}")]
    Inconsistent(String),

    #[error("artifact io error at {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("artifact decode error in {file}: {source}")]
    Decode { file: &'static str, source: serde_json::Error },

    #[error("artifact encode error in {file}: {source}")]
    Encode { file: &'static str, source: serde_json::Error },
}

/// Failure while scoring one live connection with the trained model.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("feature width mismatch: expected {expected}, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("model produced no usable probabilities: {0}")]
    Scoring(String),

    #[error("class index {0} not known to the label encoder")]
    UnknownClass(usize),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("bad CIDR pattern {pattern:?}: {reason}")]
    BadCidr { pattern: String, reason: String },

    #[error("bad address {0:?}")]
    BadAddress(String),

    #[error("bad wildcard pattern {pattern:?}: {source}")]
    BadWildcard { pattern: String, source: regex::Error },

    #[error("bad port range {0:?}")]
    BadPortRange(String),

    #[error("rule store unavailable: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training table is empty")]
    EmptyDataset,

    #[error("training table has a single class ({0}); need at least two")]
    SingleClass(String),

    #[error("class {label} has {count} rows; need at least {needed} for a stratified split")]
    TooFewRows { label: String, count: usize, needed: usize },

    #[error("{model} failed to fit: {reason}")]
    Fit { model: String, reason: String },

    #[error("training table has no label column")]
    MissingLabelColumn,

    #[error("row {line}: unknown label {label:?}")]
    UnknownLabel { line: usize, label: String },

    #[error("no model family could be fitted: {}", .0.join("; "))]
    NoModelFitted(Vec<String>),

    #[error("failed to persist artifact: {0}")]
    Persist(#[from] ArtifactError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Unreadable or structurally unusable connection batch.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("batch file is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}
