// flowsieve/src/lib.rs
//
// flowsieve: connection risk classification.
//
//   synth     labeled flow simulator for offline training
//   features  typed categorical encoders + median imputation → feature matrix
//   model     classifier roster, trainer, persisted artifact
//   rules     tenant allow-rules and rule stores
//   engine    rule → model → heuristic decision chain, JSONL dispatcher
//   eval      confusion matrix, per-class metrics, reports
//   dataset   CSV / text I/O for training tables and connection batches

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod features;
pub mod model;
pub mod rules;
pub mod synth;

pub use engine::ClassificationEngine;
pub use events::{Category, Classification, ConnectionRecord, Rule, RuleKind, TrafficLabel, TrainingRecord};
pub use features::{FeatureEngineer, FlowObservation, LabeledFlow};
pub use model::{ModelArtifact, ModelTrainer};
pub use rules::{RuleMatcher, RuleStore};
pub use synth::SyntheticDataGenerator;
