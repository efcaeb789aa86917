// flowsieve/src/config.rs
//
// TOML configuration. Every section is optional; a missing file means defaults.
// Environment overrides are applied after the file is parsed:
//
//   FLOWSIEVE_MODEL_DIR   engine.model_dir
//   FLOWSIEVE_RULES       rules.path
//   FLOWSIEVE_SEED        training.seed
//   FLOWSIEVE_LOG         logging.level

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine:   EngineSettings,
    pub training: TrainingSettings,
    pub rules:    RuleSettings,
    pub logging:  LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the five artifact files.
    pub model_dir:            PathBuf,
    /// Refuse to start without a usable artifact instead of running heuristic-only.
    pub require_model:        bool,
    /// Malicious predictions below this probability are reported as suspicious.
    pub downgrade_confidence: f64,
    pub live_defaults:        LiveDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model_dir:            PathBuf::from("static/models"),
            require_model:        false,
            downgrade_confidence: 0.70,
            live_defaults:        LiveDefaults::default(),
        }
    }
}

/// Volumetric values assumed for a live connection, which carries no flow
/// telemetry of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveDefaults {
    pub packet_count:       f64,
    pub byte_count:         f64,
    pub duration:           f64,
    pub packets_per_second: f64,
    pub bytes_per_packet:   f64,
    pub bytes_per_second:   f64,
    pub hour_of_day:        f64,
    pub is_weekend:         f64,
}

impl Default for LiveDefaults {
    fn default() -> Self {
        Self {
            packet_count:       50.0,
            byte_count:         3000.0,
            duration:           2.5,
            packets_per_second: 20.0,
            bytes_per_packet:   60.0,
            bytes_per_second:   1200.0,
            hour_of_day:        14.0,
            is_weekend:         0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub samples:       usize,
    pub seed:          u64,
    pub test_fraction: f64,
    pub cv_folds:      usize,
    /// CSV the generated table is written to, or read from with `--use-existing`.
    pub data_path:     PathBuf,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            samples:       10_000,
            seed:          42,
            test_fraction: 0.2,
            cv_folds:      3,
            data_path:     PathBuf::from("traffic_training_data.csv"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// JSON array of rules. No path means no rules.
    pub path:  Option<PathBuf>,
    /// Cache per-tenant rule lists; callers must invalidate on rule changes.
    pub cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "flowsieve=info".into() }
    }
}

impl Config {
    /// Load from `path` if it exists, defaults otherwise, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|source| ConfigError::Read { path: p.to_path_buf(), source })?;
                Self::from_toml(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FLOWSIEVE_MODEL_DIR") {
            self.engine.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FLOWSIEVE_RULES") {
            self.rules.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("FLOWSIEVE_SEED") {
            if let Ok(seed) = v.parse() {
                self.training.seed = seed;
            }
        }
        if let Ok(v) = std::env::var("FLOWSIEVE_LOG") {
            self.logging.level = v;
        }
    }
}
