//! Execution error types.
//!
//! Building an execution plan can fail; running one cannot. Task failures
//! are recorded as [`TaskExecutionError`] values on the task's result.

use thiserror::Error;

use super::task::TaskId;

/// Errors raised by a [`super::SqlClient`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlClientError {
    /// The warehouse rejected or failed the statement.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Could not reach the warehouse.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The statement did not finish in time.
    #[error("query timed out after {0} seconds")]
    Timeout(u64),
}

impl SqlClientError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Timeout(_))
    }
}

/// A failure attributed to one task.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("task {task_id} failed: {message}")]
pub struct TaskExecutionError {
    pub task_id: TaskId,
    pub message: String,
    /// Statement that failed, if the task ran one.
    pub sql: Option<String>,
}

impl TaskExecutionError {
    pub fn new(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            message: message.into(),
            sql: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

/// Result type for execution plan construction.
pub type ExecutionPlanResult<T> = Result<T, ExecutionPlanError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionPlanError {
    #[error("task {0} is already in the plan")]
    DuplicateTask(TaskId),

    #[error("task {task} depends on unknown task {parent}")]
    UnknownParent { task: TaskId, parent: TaskId },

    /// Adding the dependency would make the plan cyclic.
    #[error("task dependencies form a cycle through {0}")]
    Cycle(TaskId),
}
