//! Query requests as submitted by callers.

use serde::{Deserialize, Serialize};

/// Inclusive range applied to `metric_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub start: String,
    pub end: String,
}

/// Where query results go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "table")]
pub enum OutputTarget {
    /// Rows are returned to the caller.
    #[default]
    DataTable,
    /// Rows are written to a new warehouse table.
    Table(String),
}

/// A metric query: metrics grouped by linkable elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub metrics: Vec<String>,
    /// Group-by names such as `listing__country` or `metric_time__month`.
    pub group_by: Vec<String>,
    /// SQL templates referring to elements through `{{ Dimension('...') }}`.
    pub where_filters: Vec<String>,
    /// Output names; a leading `-` sorts descending.
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub time_constraint: Option<TimeConstraint>,
    pub output: OutputTarget,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric(mut self, name: impl Into<String>) -> Self {
        self.metrics.push(name.into());
        self
    }

    pub fn group_by(mut self, name: impl Into<String>) -> Self {
        self.group_by.push(name.into());
        self
    }

    pub fn filter(mut self, template: impl Into<String>) -> Self {
        self.where_filters.push(template.into());
        self
    }

    pub fn order_by(mut self, name: impl Into<String>) -> Self {
        self.order_by.push(name.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn time_constraint(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.time_constraint = Some(TimeConstraint {
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn into_table(mut self, table: impl Into<String>) -> Self {
        self.output = OutputTarget::Table(table.into());
        self
    }

    pub fn is_distinct_values(&self) -> bool {
        self.metrics.is_empty()
    }
}
