use std::sync::Arc;

use flowsieve::config::Config;
use flowsieve::events::{ConnectionRecord, DecisionSource};
use flowsieve::features::LabeledFlow;
use flowsieve::model::{ModelArtifact, ModelKind, ModelTrainer};
use flowsieve::rules::EmptyRuleStore;
use flowsieve::synth::SyntheticDataGenerator;
use flowsieve::ClassificationEngine;

// ---------------------------------------------------------------------------
// The out-of-the-box training run: default config, default seed, full roster
// ---------------------------------------------------------------------------

#[test]
fn default_run_fits_every_family_and_serves_the_winner() {
    let config = Config::default();
    let rows: Vec<LabeledFlow> = SyntheticDataGenerator::new(config.training.seed)
        .generate_dataset(config.training.samples)
        .iter()
        .map(LabeledFlow::from)
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("models");
    let outcome = ModelTrainer::new(config.training.clone()).train_and_save(&rows, &target).unwrap();

    let reported: Vec<ModelKind> = outcome.scores.iter().map(|s| s.model).collect();
    assert_eq!(reported, ModelKind::roster(), "a family was left out of the default run");
    for s in &outcome.scores {
        assert!((0.0..=1.0).contains(&s.accuracy), "{}: accuracy {}", s.model, s.accuracy);
        assert!((0.0..=1.0).contains(&s.cv_mean), "{}: cv mean {}", s.model, s.cv_mean);
    }

    let loaded = ModelArtifact::load(&target).unwrap();
    assert_eq!(loaded.info.best_model, outcome.artifact.info.best_model);

    let settings = flowsieve::config::EngineSettings { model_dir: target, require_model: true, ..config.engine };
    let engine = ClassificationEngine::new(settings, Arc::new(EmptyRuleStore)).unwrap();
    let c = engine.predict(&ConnectionRecord::new("203.0.113.9", "10.0.0.5", "HTTP", "/admin.php?id=1"));
    assert_eq!(c.source, DecisionSource::Model);
}
