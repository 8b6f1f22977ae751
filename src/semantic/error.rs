//! Error types for the semantic layer.
//!
//! Covers manifest lookups, linkable element resolution and query
//! resolution. These are user-facing errors; planner invariant violations
//! live in [`crate::planner::PlannerError`].

use thiserror::Error;

/// Result type for semantic operations.
pub type SemanticResult<T> = Result<T, SemanticError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("Unknown metric: '{0}'")]
    UnknownMetric(String),

    #[error("Unknown measure: '{0}'. Not defined in any semantic model.")]
    UnknownMeasure(String),

    #[error("Unknown semantic model: '{0}'")]
    UnknownSemanticModel(String),

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Measure '{measure}' has no aggregation time dimension")]
    MissingAggTimeDimension { measure: String },

    #[error("Aggregation time dimension '{dimension}' of measure '{measure}' is not a time dimension of semantic model '{semantic_model}'")]
    InvalidAggTimeDimension {
        measure: String,
        dimension: String,
        semantic_model: String,
    },

    #[error("Metric '{metric}' is invalid: {message}")]
    InvalidMetric { metric: String, message: String },

    /// Metric definitions reference each other in a cycle.
    #[error("Cyclic metric dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("'{name}' is not a valid group-by item for metrics [{}]", .metrics.join(", "))]
    UnknownGroupBy { name: String, metrics: Vec<String> },

    /// Several equally short join paths reach the same element.
    #[error("Ambiguous group-by '{name}': reachable through {} join paths of equal length. Qualify it with an entity path.", .candidates)]
    AmbiguousGroupBy { name: String, candidates: usize },

    #[error("Invalid group-by name '{0}'")]
    InvalidGroupByName(String),

    #[error("Filter references '{name}', which is not reachable: {message}")]
    InvalidFilter { name: String, message: String },

    #[error("Unknown order-by item '{0}'. Order by a requested metric or group-by item.")]
    UnknownOrderBy(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("No time spine covers granularity '{0}'")]
    MissingTimeSpine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SemanticError::UnknownGroupBy {
            name: "listing__color".into(),
            metrics: vec!["bookings".into(), "views".into()],
        };
        assert_eq!(
            err.to_string(),
            "'listing__color' is not a valid group-by item for metrics [bookings, views]"
        );

        let cycle = SemanticError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(cycle.to_string(), "Cyclic metric dependency: a -> b -> a");
    }
}
