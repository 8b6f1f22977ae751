//! Execution plan tasks.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::client::{DataTable, SqlClient};
use super::error::TaskExecutionError;
use crate::sql::SqlBindParameters;

/// Unique id of a task within and across plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let id = self.0.simple().to_string();
        write!(f, "task_{}", &id[..8])
    }
}

/// Outcome of running one task. Errors are data here, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskExecutionResult {
    pub task_id: TaskId,
    pub sql: Option<String>,
    pub data_table: Option<DataTable>,
    pub errors: Vec<TaskExecutionError>,
    pub elapsed: Duration,
}

impl TaskExecutionResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A unit of work in an execution plan.
#[async_trait]
pub trait ExecutionPlanTask: Send + Sync + fmt::Debug {
    fn task_id(&self) -> TaskId;

    /// One-line summary for logs and explain output.
    fn description(&self) -> String;

    fn sql(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, client: &dyn SqlClient) -> TaskExecutionResult;
}

/// Runs a SELECT and keeps its rows.
#[derive(Debug, Clone)]
pub struct SelectSqlQueryToDataTableTask {
    task_id: TaskId,
    sql: String,
    bind_parameters: SqlBindParameters,
}

impl SelectSqlQueryToDataTableTask {
    pub fn new(sql: impl Into<String>, bind_parameters: SqlBindParameters) -> Self {
        Self {
            task_id: TaskId::new(),
            sql: sql.into(),
            bind_parameters,
        }
    }

    pub fn bind_parameters(&self) -> &SqlBindParameters {
        &self.bind_parameters
    }
}

#[async_trait]
impl ExecutionPlanTask for SelectSqlQueryToDataTableTask {
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn description(&self) -> String {
        "select into data table".to_string()
    }

    fn sql(&self) -> Option<&str> {
        Some(&self.sql)
    }

    async fn execute(&self, client: &dyn SqlClient) -> TaskExecutionResult {
        let start = Instant::now();
        let (data_table, errors) = match client.query(&self.sql, &self.bind_parameters).await {
            Ok(table) => (Some(table), Vec::new()),
            Err(e) => (
                None,
                vec![TaskExecutionError::new(self.task_id, e.to_string()).with_sql(&self.sql)],
            ),
        };
        TaskExecutionResult {
            task_id: self.task_id,
            sql: Some(self.sql.clone()),
            data_table,
            errors,
            elapsed: start.elapsed(),
        }
    }
}

/// Runs a `CREATE TABLE ... AS SELECT`.
#[derive(Debug, Clone)]
pub struct SelectSqlQueryToTableTask {
    task_id: TaskId,
    sql: String,
    bind_parameters: SqlBindParameters,
    output_table: String,
}

impl SelectSqlQueryToTableTask {
    pub fn new(
        sql: impl Into<String>,
        bind_parameters: SqlBindParameters,
        output_table: impl Into<String>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            sql: sql.into(),
            bind_parameters,
            output_table: output_table.into(),
        }
    }

    pub fn output_table(&self) -> &str {
        &self.output_table
    }
}

#[async_trait]
impl ExecutionPlanTask for SelectSqlQueryToTableTask {
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn description(&self) -> String {
        format!("create table {}", self.output_table)
    }

    fn sql(&self) -> Option<&str> {
        Some(&self.sql)
    }

    async fn execute(&self, client: &dyn SqlClient) -> TaskExecutionResult {
        let start = Instant::now();
        let errors = match client.execute(&self.sql, &self.bind_parameters).await {
            Ok(()) => Vec::new(),
            Err(e) => vec![TaskExecutionError::new(self.task_id, e.to_string()).with_sql(&self.sql)],
        };
        TaskExecutionResult {
            task_id: self.task_id,
            sql: Some(self.sql.clone()),
            data_table: None,
            errors,
            elapsed: start.elapsed(),
        }
    }
}
