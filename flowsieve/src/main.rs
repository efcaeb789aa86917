// flowsieve/src/main.rs
//
// flowsieve: connection risk classification (allow-rules → trained model →
// heuristic fallback)
//
// Five operational modes:
//   generate  write a synthetic labeled flow table
//   train     fit the classifier roster and atomically replace the artifact
//   classify  classify one connection given on the command line
//   batch     classify a CSV / text file, results appended as JSONL
//   eval      score the saved artifact against a labeled flow table
//
// Usage:
//   flowsieve --mode train --samples 10000
//   flowsieve --mode train --use-existing
//   flowsieve --mode classify --src 10.0.0.4 --dst 10.0.0.9 --protocol HTTP --content /blog/x
//   flowsieve --mode batch --path uploads/traffic.csv --tenant 3 --output /tmp/flowsieve_output
//   flowsieve --mode eval --path traffic_training_data.csv

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowsieve::config::{Config, RuleSettings};
use flowsieve::dataset;
use flowsieve::engine::{ClassificationEngine, Dispatcher};
use flowsieve::eval::{self, report, TrainingReport};
use flowsieve::events::{ConnectionRecord, TrafficLabel, TrainingRecord};
use flowsieve::features::LabeledFlow;
use flowsieve::model::{ModelArtifact, ModelTrainer};
use flowsieve::rules::{CachedRuleStore, EmptyRuleStore, JsonRuleStore, RuleStore};
use flowsieve::synth::SyntheticDataGenerator;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "flowsieve",
    about   = "Connection risk classification: allow-rules, trained model, heuristic fallback",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "classify")]
    mode: Mode,

    #[arg(long, default_value = "flowsieve.toml", help = "TOML config (defaults if absent)")]
    config: PathBuf,

    #[arg(long, help = "Synthetic rows to generate (generate/train)")]
    samples: Option<usize>,

    #[arg(long, help = "Train from the existing table at training.data_path")]
    use_existing: bool,

    #[arg(long, help = "Override engine.model_dir")]
    model_dir: Option<PathBuf>,

    #[arg(long, default_value = "", help = "Source address (classify)")]
    src: String,

    #[arg(long, default_value = "", help = "Destination address (classify)")]
    dst: String,

    #[arg(long, default_value = "", help = "Protocol / traffic-type label (classify)")]
    protocol: String,

    #[arg(long, default_value = "", help = "URL or payload excerpt (classify)")]
    content: String,

    #[arg(long, help = "Tenant whose allow-rules apply (classify/batch)")]
    tenant: Option<i64>,

    #[arg(long, help = "Input file (batch: CSV or text; eval: labeled CSV)")]
    path: Option<PathBuf>,

    #[arg(long, default_value = "/tmp/flowsieve_output", help = "JSONL output directory (batch)")]
    output: PathBuf,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Generate, // synthetic labeled table → CSV
    Train,    // offline training run, replaces the artifact
    Classify, // one connection from flags
    Batch,    // a file of connections → JSONL
    Eval,     // saved artifact vs. labeled table
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn rule_store(settings: &RuleSettings) -> Arc<dyn RuleStore> {
    match (&settings.path, settings.cache) {
        (None, _)          => Arc::new(EmptyRuleStore),
        (Some(p), false)   => Arc::new(JsonRuleStore::new(p)),
        (Some(p), true)    => Arc::new(CachedRuleStore::new(JsonRuleStore::new(p))),
    }
}

fn build_engine(config: &Config) -> Result<ClassificationEngine> {
    ClassificationEngine::new(config.engine.clone(), rule_store(&config.rules))
        .with_context(|| format!("model required but unusable at {}", config.engine.model_dir.display()))
}

fn label_counts(labels: impl Iterator<Item = TrafficLabel>) -> BTreeMap<TrafficLabel, usize> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

// ── Modes ─────────────────────────────────────────────────────────────────────

fn generate(config: &Config, samples: usize) -> Result<Vec<TrainingRecord>> {
    let records = SyntheticDataGenerator::new(config.training.seed).generate_dataset(samples);
    dataset::write_training_csv(&config.training.data_path, &records)
        .with_context(|| format!("failed to write {}", config.training.data_path.display()))?;
    Ok(records)
}

async fn train(config: &Config, samples: usize, use_existing: bool) -> Result<()> {
    let data_path = &config.training.data_path;
    let records: Vec<LabeledFlow> = if use_existing && data_path.exists() {
        dataset::read_training_csv(data_path).with_context(|| format!("failed to load {}", data_path.display()))?
    } else {
        if use_existing {
            warn!(path = %data_path.display(), "no existing training table, generating one");
        }
        generate(config, samples)?.iter().map(LabeledFlow::from).collect()
    };
    println!("Training on {} rows: {:?}", records.len(), label_counts(records.iter().map(|r| r.label)));

    let trainer   = ModelTrainer::new(config.training.clone());
    let model_dir = config.engine.model_dir.clone();
    let start     = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || trainer.train_and_save(&records, &model_dir))
        .await
        .context("training task panicked")?
        .context("training failed")?;
    info!(secs = start.elapsed().as_secs_f64(), "training finished");

    let report = TrainingReport::from_outcome(&outcome);
    report::print_markdown(&report);
    let path = report::write_json(&report, &config.engine.model_dir).context("failed to write training report")?;
    println!("\nArtifact: {}  Report: {}", config.engine.model_dir.display(), path.display());
    Ok(())
}

fn classify(config: &Config, cli: &Cli) -> Result<()> {
    let engine = build_engine(config)?;
    let mut conn = ConnectionRecord::new(&cli.src, &cli.dst, &cli.protocol, &cli.content);
    conn.tenant_id = cli.tenant;

    let c = engine.predict(&conn);
    println!("{}", c.display_label());
    println!("  connection : {}", conn);
    println!("  decided by : {:?}", c.source);
    if let Some(p) = c.confidence {
        println!("  confidence : {:.4}", p);
    }
    if let Some(s) = c.risk_score {
        println!("  risk score : {}", s);
    }
    Ok(())
}

async fn batch(config: &Config, cli: &Cli) -> Result<()> {
    let Some(path) = &cli.path else {
        bail!("--path is required for batch mode");
    };
    let rows = dataset::read_connection_file(path, cli.tenant)
        .with_context(|| format!("failed to read batch {}", path.display()))?;
    let engine = build_engine(config)?;
    let dispatcher = Dispatcher::new(cli.output.clone())?;

    let summary = dispatcher.run_batch(&engine, &rows).await?;
    println!("Processed {} rows → {}", summary.processed, dispatcher.output_dir().display());
    for (category, n) in &summary.by_category {
        println!("  {:8} {}", category.label(), n);
    }
    Ok(())
}

fn evaluate(config: &Config, cli: &Cli) -> Result<()> {
    let model_dir = &config.engine.model_dir;
    let artifact = ModelArtifact::load(model_dir)
        .with_context(|| format!("no usable artifact at {}", model_dir.display()))?;
    let path = cli.path.as_ref().unwrap_or(&config.training.data_path);
    let records = dataset::read_training_csv(path).with_context(|| format!("failed to load {}", path.display()))?;

    let result = eval::evaluate(&artifact, &records).context("evaluation failed")?;
    report::print_eval(&result);
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(Some(&cli.config))?;
    if let Some(dir) = &cli.model_dir {
        config.engine.model_dir = dir.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive(config.logging.level.parse()?))
        .compact().init();

    let samples = cli.samples.unwrap_or(config.training.samples);
    match cli.mode {
        Mode::Generate => {
            let records = generate(&config, samples)?;
            println!(
                "Wrote {} rows to {}: {:?}",
                records.len(),
                config.training.data_path.display(),
                label_counts(records.iter().map(|r| r.label))
            );
        }
        Mode::Train    => train(&config, samples, cli.use_existing).await?,
        Mode::Classify => classify(&config, &cli)?,
        Mode::Batch    => batch(&config, &cli).await?,
        Mode::Eval     => evaluate(&config, &cli)?,
    }
    Ok(())
}
