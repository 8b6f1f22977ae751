//! # Meridian
//!
//! A semantic layer that plans metric queries into multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Semantic Manifest (JSON) + meridian.toml        │
//! │  (semantic models, measures, metrics, time spines)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [model::loader, validation]
//! ┌─────────────────────────────────────────────────────────┐
//! │      SemanticModelIndex + LinkableElementResolver        │
//! │      (join paths, linkable elements per measure)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query::resolve]
//! ┌─────────────────────────────────────────────────────────┐
//! │   EvaluationPlan (base + recursive metric queries)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [dataflow]
//! ┌─────────────────────────────────────────────────────────┐
//! │          DataflowPlan → SQL (per dialect)                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [execution]
//! ┌─────────────────────────────────────────────────────────┐
//! │     ExecutionPlan → SqlClient → ExecutionResults         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`engine::QueryEngine`] wires the layers together.

pub mod config;
pub mod dataflow;
pub mod engine;
pub mod execution;
pub mod model;
pub mod planner;
pub mod query;
pub mod semantic;
pub mod sql;
pub mod validation;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::engine::{EngineError, EngineResult, QueryEngine, QueryExplanation};
    pub use crate::execution::{
        CancellationToken, DataTable, ExecutionResults, SqlClient, SqlClientError,
    };
    pub use crate::model::{load_manifest_file, load_manifest_str, Manifest};
    pub use crate::query::{OutputTarget, QueryRequest};
    pub use crate::semantic::{LinkableElementFilter, LinkableElementProperty};
    pub use crate::sql::{Dialect, SqlBindParameters};
    pub use crate::validation::{validate_manifest, ModelValidationResults};
}

pub use engine::{EngineError, QueryEngine};
pub use sql::Dialect;
