// flowsieve/src/features/encoders.rs
//
// Categorical encoders and numeric median imputation, fitted once on the
// training table and persisted with the model.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Label encoder for one categorical column. Classes are kept sorted, so codes
/// are stable for a given training table. Values never seen during fitting
/// encode to `unseen()`, one past the last class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    classes: Vec<String>,
}

impl CategoryEncoder {
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<String> = values.into_iter().map(str::to_string).collect();
        Self { classes: classes.into_iter().collect() }
    }

    pub fn encode(&self, value: &str) -> usize {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .unwrap_or_else(|_| self.unseen())
    }

    /// Encode an absent value (source column missing).
    pub fn encode_opt(&self, value: Option<&str>) -> usize {
        value.map(|v| self.encode(v)).unwrap_or_else(|| self.unseen())
    }

    pub fn unseen(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

/// The closed set of categorical inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoricalFeature {
    Protocol,
    SrcIpClass,
    DstIpClass,
    PortCategory,
}

impl CategoricalFeature {
    pub const ALL: [CategoricalFeature; 4] =
        [Self::Protocol, Self::SrcIpClass, Self::DstIpClass, Self::PortCategory];

    pub fn name(self) -> &'static str {
        match self {
            Self::Protocol     => "protocol",
            Self::SrcIpClass   => "src_ip_class",
            Self::DstIpClass   => "dst_ip_class",
            Self::PortCategory => "port_category",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Protocol     => 0,
            Self::SrcIpClass   => 1,
            Self::DstIpClass   => 2,
            Self::PortCategory => 3,
        }
    }
}

/// One encoder per categorical feature, addressed by type rather than by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoders {
    pub protocol:      CategoryEncoder,
    pub src_ip_class:  CategoryEncoder,
    pub dst_ip_class:  CategoryEncoder,
    pub port_category: CategoryEncoder,
}

impl CategoricalEncoders {
    pub fn get(&self, feature: CategoricalFeature) -> &CategoryEncoder {
        match feature {
            CategoricalFeature::Protocol     => &self.protocol,
            CategoricalFeature::SrcIpClass   => &self.src_ip_class,
            CategoricalFeature::DstIpClass   => &self.dst_ip_class,
            CategoricalFeature::PortCategory => &self.port_category,
        }
    }

    /// Fit all four encoders from per-row categorical values (absent values skipped).
    pub fn fit(rows: &[[Option<String>; 4]]) -> Self {
        let fit_col = |f: CategoricalFeature| {
            CategoryEncoder::fit(rows.iter().filter_map(|r| r[f.index()].as_deref()))
        };
        Self {
            protocol:      fit_col(CategoricalFeature::Protocol),
            src_ip_class:  fit_col(CategoricalFeature::SrcIpClass),
            dst_ip_class:  fit_col(CategoricalFeature::DstIpClass),
            port_category: fit_col(CategoricalFeature::PortCategory),
        }
    }
}

/// Per-column medians of the training batch, used to fill absent numeric values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericImputer {
    medians: Vec<f64>,
}

impl NumericImputer {
    pub fn fit<const N: usize>(rows: &[[Option<f64>; N]]) -> Self {
        let medians = (0..N)
            .map(|col| {
                let mut present: Vec<f64> = rows
                    .iter()
                    .filter_map(|r| r[col])
                    .filter(|v| v.is_finite())
                    .collect();
                median(&mut present).unwrap_or(0.0)
            })
            .collect();
        Self { medians }
    }

    pub fn fill(&self, col: usize, value: Option<f64>) -> f64 {
        match value {
            Some(v) if v.is_finite() => v,
            _ => self.medians.get(col).copied().unwrap_or(0.0),
        }
    }

    pub fn len(&self) -> usize {
        self.medians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.medians.is_empty()
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
