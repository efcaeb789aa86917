// flowsieve/src/engine/mod.rs
//
// ClassificationEngine: one connection in, one Classification out.
//
// Decision chain, first step that yields wins:
//
//   1. rules      tenant's active allow-rules   → White (matched rule name)
//   2. model      loaded artifact, if any       → mapped category, downgraded
//                                                 Malicious→Suspicious below
//                                                 the confidence threshold
//   3. heuristic  deterministic risk score      → always yields
//
// Each step returns its own typed outcome. Nothing in the chain can fail the
// caller: rule store errors and inference errors are logged and skipped.

pub mod dispatcher;
pub mod heuristic;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{ArtifactError, InferenceError};
use crate::events::{Category, Classification, ConnectionRecord, TenantId};
use crate::features::FlowObservation;
use crate::model::{ModelArtifact, Prediction};
use crate::rules::{RuleMatcher, RuleStore};

pub use dispatcher::{BatchSummary, ClassifiedRecord, Dispatcher};

pub struct ClassificationEngine {
    settings: EngineSettings,
    artifact: Option<Arc<ModelArtifact>>,
    rules:    Arc<dyn RuleStore>,
    matcher:  RuleMatcher,
}

impl ClassificationEngine {
    /// Load the artifact from `settings.model_dir`. A missing or inconsistent
    /// bundle is an error only when `require_model` is set; otherwise the
    /// engine runs heuristic-only for the lifetime of the process.
    pub fn new(settings: EngineSettings, rules: Arc<dyn RuleStore>) -> Result<Self, ArtifactError> {
        let artifact = match ModelArtifact::load(&settings.model_dir) {
            Ok(a) => Some(a),
            Err(e) if settings.require_model => return Err(e),
            Err(e) => {
                warn!(error = %e, dir = %settings.model_dir.display(), "model unavailable, heuristic-only mode");
                None
            }
        };
        Ok(Self::with_model(settings, artifact, rules))
    }

    /// Build around an already loaded (or deliberately absent) artifact.
    pub fn with_model(settings: EngineSettings, artifact: Option<ModelArtifact>, rules: Arc<dyn RuleStore>) -> Self {
        Self {
            settings,
            artifact: artifact.map(Arc::new),
            rules,
            matcher: RuleMatcher::new(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        self.artifact.as_deref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn predict(&self, conn: &ConnectionRecord) -> Classification {
        if let Some(c) = self.rule_step(conn) {
            return c;
        }
        match self.model_step(conn) {
            Ok(Some(c)) => return c,
            Ok(None) => {}
            Err(e) => warn!(error = %e, conn = %conn, "model inference failed, using heuristic"),
        }
        self.heuristic_step(conn)
    }

    /// Same as [`predict`](Self::predict) with the tenant passed separately.
    pub fn predict_for(&self, conn: &ConnectionRecord, tenant: Option<TenantId>) -> Classification {
        let mut conn = conn.clone();
        conn.tenant_id = tenant;
        self.predict(&conn)
    }

    // ── Chain steps ───────────────────────────────────────────────────────────

    /// `None` when there is no tenant, no matching rule, or the store failed.
    pub fn rule_step(&self, conn: &ConnectionRecord) -> Option<Classification> {
        let tenant = conn.tenant_id?;
        let rules = match self.rules.fetch_active_rules(tenant) {
            Ok(r) => r,
            Err(e) => {
                warn!(tenant, error = %e, "rule store failed, continuing without rules");
                return None;
            }
        };
        let hit = self.matcher.first_match(&rules, conn, tenant)?;
        debug!(tenant, rule = %hit.name, conn = %conn, "allow-rule matched");
        Some(Classification::rule_match(hit.name.clone()))
    }

    /// `Ok(None)` when no model is loaded.
    pub fn model_step(&self, conn: &ConnectionRecord) -> Result<Option<Classification>, InferenceError> {
        let Some(artifact) = self.artifact.as_deref() else {
            return Ok(None);
        };
        let obs = FlowObservation::live(conn, &self.settings.live_defaults);
        let pred = artifact.predict_one(&obs)?;
        Ok(Some(map_prediction(pred, self.settings.downgrade_confidence)))
    }

    pub fn heuristic_step(&self, conn: &ConnectionRecord) -> Classification {
        let score = heuristic::score(conn);
        let total = score.total();
        debug!(base = score.base, content = score.content, addresses = score.addresses, total, "heuristic score");
        Classification::from_heuristic(score.category(), total)
    }
}

/// Training label → business category, with low-confidence malicious
/// predictions reported as suspicious.
pub fn map_prediction(pred: Prediction, downgrade_below: f64) -> Classification {
    let mut category = pred.label.category();
    if category == Category::Malicious && pred.confidence < downgrade_below {
        info!(label = %pred.label, confidence = pred.confidence, "malicious prediction downgraded");
        category = Category::Suspicious;
    }
    Classification::from_model(category, pred.confidence)
}
