//! Running rendered SQL against a warehouse.
//!
//! ```text
//! DataflowPlan ──► DataflowToExecutionPlanConverter ──► ExecutionPlan (task DAG)
//!                                                            │
//!                          SqlClient ◄── PlanExecutor ◄──────┘
//!                                             │
//!                                             ▼
//!                                      ExecutionResults
//! ```
//!
//! Failures while running are recorded per task; only a malformed plan is
//! an `Err`.

mod client;
mod error;
mod executor;
mod plan;
mod task;

pub use client::{DataTable, SqlClient};
pub use error::{ExecutionPlanError, ExecutionPlanResult, SqlClientError, TaskExecutionError};
pub use executor::{
    CancellationToken, ExecutionResults, PlanExecutor, TaskStatus, DEFAULT_MAX_CONCURRENCY,
};
pub use plan::{DataflowToExecutionPlanConverter, ExecutionPlan};
pub use task::{
    ExecutionPlanTask, SelectSqlQueryToDataTableTask, SelectSqlQueryToTableTask,
    TaskExecutionResult, TaskId,
};
