// flowsieve/src/model/labels.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::events::TrafficLabel;

/// Maps training labels to contiguous class indices and back. Only labels
/// present in the training table get an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabels {
    classes: Vec<TrafficLabel>,
}

impl ClassLabels {
    pub fn fit(labels: impl IntoIterator<Item = TrafficLabel>) -> Self {
        let set: BTreeSet<TrafficLabel> = labels.into_iter().collect();
        Self { classes: set.into_iter().collect() }
    }

    pub fn encode(&self, label: TrafficLabel) -> Option<usize> {
        self.classes.binary_search(&label).ok()
    }

    pub fn decode(&self, index: usize) -> Result<TrafficLabel, InferenceError> {
        self.classes.get(index).copied().ok_or(InferenceError::UnknownClass(index))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[TrafficLabel] {
        &self.classes
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.as_str().to_string()).collect()
    }
}
