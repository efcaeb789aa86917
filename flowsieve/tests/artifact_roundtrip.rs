use std::sync::Arc;

use flowsieve::config::{EngineSettings, TrainingSettings};
use flowsieve::error::ArtifactError;
use flowsieve::events::{ConnectionRecord, DecisionSource};
use flowsieve::features::FlowObservation;
use flowsieve::model::artifact::{ARTIFACT_FILES, INFO_FILE, MODEL_FILE};
use flowsieve::model::{ModelArtifact, ModelKind, ModelTrainer, TrainingOutcome};
use flowsieve::rules::EmptyRuleStore;
use flowsieve::synth::SyntheticDataGenerator;
use flowsieve::ClassificationEngine;

fn train(seed: u64, roster: Vec<ModelKind>) -> TrainingOutcome {
    let rows = SyntheticDataGenerator::new(seed).generate_dataset(360);
    let settings = TrainingSettings { seed, ..TrainingSettings::default() };
    ModelTrainer::new(settings).with_roster(roster).train(&rows).unwrap()
}

fn held_out_batch(seed: u64) -> Vec<FlowObservation> {
    SyntheticDataGenerator::new(seed).generate_dataset(120).iter().map(FlowObservation::from).collect()
}

// ---------------------------------------------------------------------------
// Save → load reproduces predictions
// ---------------------------------------------------------------------------

#[test]
fn reloaded_artifact_predicts_identically() {
    for kind in [
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
        ModelKind::LogisticRegression,
        ModelKind::Svm,
        ModelKind::NeuralNetwork,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("models");
        let original = train(3, vec![kind]).artifact;
        original.save(&target).unwrap();
        let loaded = ModelArtifact::load(&target).unwrap();

        let batch = held_out_batch(99);
        let before = original.predict_batch(&batch).unwrap();
        let after = loaded.predict_batch(&batch).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.label, b.label, "{kind}: label changed after reload");
            assert!((a.confidence - b.confidence).abs() < 1e-9, "{kind}: {} vs {}", a.confidence, b.confidence);
        }
        assert_eq!(loaded.info.best_model, kind);
    }
}

#[test]
fn save_writes_all_five_files() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("models");
    train(4, vec![ModelKind::Svm]).artifact.save(&target).unwrap();
    for name in ARTIFACT_FILES {
        assert!(target.join(name).is_file(), "{name} missing");
    }
}

// ---------------------------------------------------------------------------
// Replacement is whole-bundle
// ---------------------------------------------------------------------------

#[test]
fn retraining_replaces_the_whole_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("models");
    train(5, vec![ModelKind::Svm, ModelKind::LogisticRegression]).artifact.save(&target).unwrap();
    let first_model = std::fs::read(target.join(MODEL_FILE)).unwrap();

    train(6, vec![ModelKind::GradientBoosting]).artifact.save(&target).unwrap();
    let second = ModelArtifact::load(&target).unwrap();
    assert_eq!(second.info.best_model, ModelKind::GradientBoosting);
    assert_ne!(std::fs::read(target.join(MODEL_FILE)).unwrap(), first_model);

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let visible: Vec<&String> = names.iter().filter(|n| !n.starts_with('.')).collect();
    assert_eq!(visible, vec!["models"]);
    assert!(names.iter().filter(|n| n.starts_with('.')).all(|n| n.starts_with(".models.v")), "{names:?}");
}

#[test]
fn mixing_files_from_two_runs_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    train(7, vec![ModelKind::Svm, ModelKind::LogisticRegression]).artifact.save(&a).unwrap();
    train(8, vec![ModelKind::Svm]).artifact.save(&b).unwrap();

    std::fs::copy(b.join(MODEL_FILE), a.join(MODEL_FILE)).unwrap();
    assert!(matches!(ModelArtifact::load(&a), Err(ArtifactError::Inconsistent(_))));
}

// ---------------------------------------------------------------------------
// Engine startup against the saved bundle
// ---------------------------------------------------------------------------

#[test]
fn engine_uses_saved_model_and_degrades_without_it() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("models");
    train(9, vec![ModelKind::Svm, ModelKind::LogisticRegression]).artifact.save(&target).unwrap();

    let settings = EngineSettings { model_dir: target.clone(), require_model: true, ..EngineSettings::default() };
    let engine = ClassificationEngine::new(settings.clone(), Arc::new(EmptyRuleStore)).unwrap();
    let conn = ConnectionRecord::new("192.168.1.4", "93.184.216.34", "HTTPS", "/index");
    assert_eq!(engine.predict(&conn).source, DecisionSource::Model);

    std::fs::remove_file(target.join(INFO_FILE)).unwrap();
    assert!(matches!(
        ClassificationEngine::new(settings.clone(), Arc::new(EmptyRuleStore)),
        Err(ArtifactError::Missing { .. })
    ));

    let lenient = EngineSettings { require_model: false, ..settings };
    let engine = ClassificationEngine::new(lenient, Arc::new(EmptyRuleStore)).unwrap();
    assert!(!engine.has_model());
    assert_eq!(engine.predict(&conn).source, DecisionSource::Heuristic);
}
