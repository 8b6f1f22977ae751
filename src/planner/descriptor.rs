//! Metric descriptors: one specific usage of a metric.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::{MetricInput, MetricTimeWindow, TimeGranularity};

/// Time offset applied to a metric input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOffset {
    /// Values from `window` earlier.
    Window(MetricTimeWindow),
    /// Values as of the start of the enclosing `granularity` period.
    ToGrain(TimeGranularity),
}

impl MetricOffset {
    /// Offset declared on an input, preferring the window.
    pub fn from_input(input: &MetricInput) -> Option<Self> {
        input
            .offset_window
            .clone()
            .map(MetricOffset::Window)
            .or(input.offset_to_grain.map(MetricOffset::ToGrain))
    }
}

impl fmt::Display for MetricOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricOffset::Window(window) => write!(f, "offset {}", window),
            MetricOffset::ToGrain(granularity) => write!(f, "offset to {}", granularity),
        }
    }
}

/// A metric plus the filters, alias and offset it is used with. Two
/// descriptors naming the same metric are different planning units when
/// any of these differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricDescriptor {
    pub metric_name: String,
    pub filters: BTreeSet<String>,
    pub alias: Option<String>,
    pub offset: Option<MetricOffset>,
}

impl MetricDescriptor {
    /// A plain reference to a metric, as requested by a query.
    pub fn plain(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            filters: BTreeSet::new(),
            alias: None,
            offset: None,
        }
    }

    /// Whether a query computing this descriptor can also carry its inputs'
    /// other outputs through.
    pub fn allows_passed_metrics(&self) -> bool {
        self.filters.is_empty() && self.alias.is_none() && self.offset.is_none()
    }

    /// Name a derived expression uses for this input.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.metric_name)
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric_name)?;
        if self.allows_passed_metrics() {
            return Ok(());
        }
        let mut details = Vec::new();
        if let Some(alias) = &self.alias {
            details.push(format!("alias {}", alias));
        }
        if let Some(offset) = &self.offset {
            details.push(offset.to_string());
        }
        if !self.filters.is_empty() {
            let filters: Vec<&str> = self.filters.iter().map(String::as_str).collect();
            details.push(format!("where {}", filters.join(" AND ")));
        }
        write!(f, "[{}]", details.join("; "))
    }
}
