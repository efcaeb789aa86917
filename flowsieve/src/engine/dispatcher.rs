// flowsieve/src/engine/dispatcher.rs
//
// Appends classified connections to JSONL files, one per category, plus a
// shared audit log:
//
//   white_traffic.jsonl  normal_traffic.jsonl  suspicious_traffic.jsonl
//   malicious_traffic.jsonl                    audit_log.jsonl
//
// Point downstream consumers (SIEM import, review queue) at these files.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::ClassificationEngine;
use crate::dataset::BatchRow;
use crate::events::{Category, Classification, ConnectionRecord};

pub const AUDIT_FILE: &str = "audit_log.jsonl";

/// One line of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub id:             String,
    pub connection:     ConnectionRecord,
    pub classification: Classification,
    pub display_label:  String,
    pub timestamp:      DateTime<Utc>,
}

impl ClassifiedRecord {
    pub fn new(id: impl Into<String>, connection: ConnectionRecord, classification: Classification) -> Self {
        Self {
            id:            id.into(),
            display_label: classification.display_label(),
            connection,
            classification,
            timestamp:     Utc::now(),
        }
    }

    pub fn to_jsonl(&self) -> Result<String> {
        Ok(serde_json::to_string(self)? + "\n")
    }
}

pub fn category_file(category: Category) -> &'static str {
    match category {
        Category::White      => "white_traffic.jsonl",
        Category::Normal     => "normal_traffic.jsonl",
        Category::Suspicious => "suspicious_traffic.jsonl",
        Category::Malicious  => "malicious_traffic.jsonl",
    }
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub processed:   usize,
    pub by_category: BTreeMap<Category, usize>,
}

pub struct Dispatcher {
    out: PathBuf,
}

impl Dispatcher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)
            .with_context(|| format!("failed to create output directory {}", out.display()))?;
        Ok(Self { out })
    }

    pub fn output_dir(&self) -> &Path {
        &self.out
    }

    pub async fn dispatch(&self, record: &ClassifiedRecord) -> Result<()> {
        let line = record.to_jsonl()?;
        self.write(category_file(record.classification.category), &line).await?;
        self.write(AUDIT_FILE, &line).await?;
        debug!(id = %record.id, label = %record.display_label, "classification dispatched");
        Ok(())
    }

    /// Classify and dispatch every row in order. Returns once all rows are
    /// written; a write failure aborts the remainder.
    pub async fn run_batch(&self, engine: &ClassificationEngine, rows: &[BatchRow]) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        for row in rows {
            let classification = engine.predict(&row.connection);
            *summary.by_category.entry(classification.category).or_default() += 1;
            self.dispatch(&ClassifiedRecord::new(row.id.clone(), row.connection.clone(), classification)).await?;
            summary.processed += 1;
        }
        info!(processed = summary.processed, by_category = ?summary.by_category, "batch classified");
        Ok(summary)
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let path = self.out.join(file);
        let mut f = OpenOptions::new().create(true).append(true)
            .open(&path).await
            .with_context(|| format!("failed to open {}", path.display()))?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_category_file_and_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let d = Dispatcher::new(dir.path().join("out")).unwrap();

        let conn = ConnectionRecord::new("10.0.0.1", "10.0.0.2", "DNS", "");
        d.dispatch(&ClassifiedRecord::new("1", conn.clone(), Classification::from_heuristic(Category::White, -2)))
            .await
            .unwrap();
        d.dispatch(&ClassifiedRecord::new("2", conn, Classification::rule_match("lan"))).await.unwrap();

        let white = std::fs::read_to_string(d.output_dir().join("white_traffic.jsonl")).unwrap();
        assert_eq!(white.lines().count(), 2);
        let audit = std::fs::read_to_string(d.output_dir().join(AUDIT_FILE)).unwrap();
        let last: ClassifiedRecord = serde_json::from_str(audit.lines().last().unwrap()).unwrap();
        assert_eq!(last.display_label, "白流量 (匹配规则: lan)");
        assert!(!d.output_dir().join("malicious_traffic.jsonl").exists());
    }

    #[tokio::test]
    async fn batch_run_counts_each_category() {
        use crate::config::EngineSettings;
        use crate::dataset::parse_connection_text;
        use crate::rules::EmptyRuleStore;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let d = Dispatcher::new(dir.path()).unwrap();
        let engine = ClassificationEngine::with_model(EngineSettings::default(), None, Arc::new(EmptyRuleStore));
        let rows = parse_connection_text(
            "1,172.16.0.5,172.16.0.9,视频流量\n2,203.0.114.7,10.0.0.8,恶意流量,/wp-content/a/b/c/d\n",
            None,
        );
        let summary = d.run_batch(&engine, &rows).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.by_category.get(&Category::White), Some(&1));
        assert_eq!(summary.by_category.get(&Category::Malicious), Some(&1));

        let audit = std::fs::read_to_string(dir.path().join(AUDIT_FILE)).unwrap();
        assert_eq!(audit.lines().count(), 2);
    }
}
