//! Planner errors.
//!
//! Everything except `Semantic` is a planner defect: the plan under
//! construction is structurally wrong and there is no partial result.

use thiserror::Error;

use crate::semantic::SemanticError;

pub type PlannerResult<T> = Result<T, PlannerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error("Metric descriptor {descriptor} was collected twice with different inputs")]
    ConflictingInputs { descriptor: String },

    #[error("Evaluation levels are not dense: level {missing} is empty (max level {max_level})")]
    NonDenseLevels { missing: usize, max_level: usize },

    #[error("Expected exactly one query computing {descriptor}, found {count}")]
    InputQueryCount { descriptor: String, count: usize },

    #[error("Metric descriptor {descriptor} is computed by {count} queries")]
    DescriptorOwnership { descriptor: String, count: usize },

    #[error("Unhandled dataflow node kind: {0}")]
    UnhandledNodeKind(String),

    #[error("Planner invariant violated: {0}")]
    InvariantViolation(String),
}
