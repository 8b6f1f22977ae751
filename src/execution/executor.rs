//! Runs execution plans wave by wave.
//!
//! Tasks of one wave run concurrently, at most `max_concurrency` at a time.
//! A task whose parent did not succeed is skipped and marked
//! [`TaskStatus::UpstreamFailed`]. Cancelling stops in-flight queries and
//! keeps every task not yet started from being scheduled.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{info, warn};

use super::client::{DataTable, SqlClient};
use super::error::ExecutionPlanResult;
use super::plan::ExecutionPlan;
use super::task::{ExecutionPlanTask, TaskExecutionResult, TaskId};

/// Default bound on concurrently running tasks.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Cloneable handle a caller uses to abort an execution.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`Self::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone, so `changed` never errors here.
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Succeeded(TaskExecutionResult),
    Failed(TaskExecutionResult),
    /// Not run because a parent failed, was skipped, or was cancelled.
    UpstreamFailed,
    Cancelled,
}

impl TaskStatus {
    pub fn result(&self) -> Option<&TaskExecutionResult> {
        match self {
            TaskStatus::Succeeded(result) | TaskStatus::Failed(result) => Some(result),
            TaskStatus::UpstreamFailed | TaskStatus::Cancelled => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded(_))
    }
}

/// Status of every task in a plan, in plan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResults {
    statuses: Vec<(TaskId, TaskStatus)>,
}

impl ExecutionResults {
    pub fn status(&self, id: TaskId) -> Option<&TaskStatus> {
        self.statuses
            .iter()
            .find(|(task, _)| *task == id)
            .map(|(_, status)| status)
    }

    pub fn statuses(&self) -> &[(TaskId, TaskStatus)] {
        &self.statuses
    }

    /// True unless every task ran and succeeded.
    pub fn contains_task_errors(&self) -> bool {
        self.statuses.iter().any(|(_, status)| !status.is_success())
    }

    pub fn was_cancelled(&self) -> bool {
        self.statuses
            .iter()
            .any(|(_, status)| matches!(status, TaskStatus::Cancelled))
    }

    /// Error messages of every failed task.
    pub fn error_messages(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter_map(|(_, status)| status.result())
            .flat_map(|result| result.errors.iter().map(|e| e.to_string()))
            .collect()
    }

    /// The data table of the last task that produced one.
    pub fn data_table(&self) -> Option<&DataTable> {
        self.statuses
            .iter()
            .rev()
            .filter_map(|(_, status)| status.result())
            .find_map(|result| result.data_table.as_ref())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanExecutor {
    max_concurrency: usize,
}

impl PlanExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        client: &dyn SqlClient,
        cancel: &CancellationToken,
    ) -> ExecutionPlanResult<ExecutionResults> {
        let waves = plan.waves()?;
        let mut statuses: HashMap<TaskId, TaskStatus> = HashMap::with_capacity(plan.len());

        for wave in waves {
            let mut runnable: Vec<Arc<dyn ExecutionPlanTask>> = Vec::with_capacity(wave.len());
            for id in wave {
                let upstream_ok = plan
                    .parents(id)
                    .iter()
                    .all(|parent| statuses.get(parent).is_some_and(TaskStatus::is_success));
                if cancel.is_cancelled() {
                    statuses.insert(id, TaskStatus::Cancelled);
                } else if !upstream_ok {
                    warn!(task = %id, "skipping task after upstream failure");
                    statuses.insert(id, TaskStatus::UpstreamFailed);
                } else if let Some(task) = plan.task(id) {
                    runnable.push(task.clone());
                }
            }

            let finished: Vec<(TaskId, TaskStatus)> = stream::iter(runnable)
                .map(|task| run_task(task, client, cancel))
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
            statuses.extend(finished);
        }

        if cancel.is_cancelled() {
            info!("execution cancelled");
        }
        let statuses = plan
            .tasks()
            .map(|task| {
                let id = task.task_id();
                let status = statuses.remove(&id).unwrap_or(TaskStatus::Cancelled);
                (id, status)
            })
            .collect();
        Ok(ExecutionResults { statuses })
    }
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

async fn run_task(
    task: Arc<dyn ExecutionPlanTask>,
    client: &dyn SqlClient,
    cancel: &CancellationToken,
) -> (TaskId, TaskStatus) {
    let id = task.task_id();
    info!(task = %id, description = %task.description(), "starting task");
    tokio::select! {
        result = task.execute(client) => {
            if result.is_success() {
                info!(task = %id, elapsed_ms = result.elapsed.as_millis() as u64, "task finished");
                (id, TaskStatus::Succeeded(result))
            } else {
                warn!(task = %id, errors = result.errors.len(), "task failed");
                (id, TaskStatus::Failed(result))
            }
        }
        _ = cancel.cancelled() => {
            info!(task = %id, "task cancelled");
            (id, TaskStatus::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::error::SqlClientError;
    use crate::execution::task::SelectSqlQueryToDataTableTask;
    use crate::sql::{Dialect, SqlBindParameters};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails statements containing "fail", hangs on "sleep".
    #[derive(Default)]
    struct ScriptedClient {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlClient for ScriptedClient {
        fn dialect(&self) -> Dialect {
            Dialect::DuckDb
        }

        async fn query(
            &self,
            sql: &str,
            _bind_parameters: &SqlBindParameters,
        ) -> Result<DataTable, SqlClientError> {
            self.seen.lock().unwrap().push(sql.to_string());
            if sql.contains("sleep") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if sql.contains("fail") {
                return Err(SqlClientError::QueryFailed("boom".into()));
            }
            Ok(DataTable::new(vec!["x".into()], vec![vec![serde_json::json!(1)]]))
        }

        async fn execute(
            &self,
            sql: &str,
            bind_parameters: &SqlBindParameters,
        ) -> Result<(), SqlClientError> {
            self.query(sql, bind_parameters).await.map(|_| ())
        }
    }

    fn select(sql: &str) -> Arc<dyn ExecutionPlanTask> {
        Arc::new(SelectSqlQueryToDataTableTask::new(sql, SqlBindParameters::new()))
    }

    #[tokio::test]
    async fn test_failure_skips_children() {
        let mut plan = ExecutionPlan::new();
        let ok = plan.add_task(select("SELECT 1"), &[]).unwrap();
        let bad = plan.add_task(select("SELECT fail"), &[]).unwrap();
        let child = plan.add_task(select("SELECT 2"), &[ok, bad]).unwrap();

        let client = ScriptedClient::default();
        let results = PlanExecutor::new(2)
            .execute(&plan, &client, &CancellationToken::new())
            .await
            .unwrap();

        assert!(results.contains_task_errors());
        assert!(results.status(ok).unwrap().is_success());
        assert!(matches!(results.status(bad), Some(TaskStatus::Failed(_))));
        assert_eq!(results.status(child), Some(&TaskStatus::UpstreamFailed));
        assert_eq!(results.error_messages().len(), 1);
        assert!(!client.seen.lock().unwrap().contains(&"SELECT 2".to_string()));
    }

    #[tokio::test]
    async fn test_success_returns_data_table() {
        let plan = ExecutionPlan::single(select("SELECT 1"));
        let results = PlanExecutor::default()
            .execute(&plan, &ScriptedClient::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!results.contains_task_errors());
        assert_eq!(results.data_table().unwrap().row_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_and_pending_tasks() {
        let mut plan = ExecutionPlan::new();
        let slow = plan.add_task(select("SELECT sleep"), &[]).unwrap();
        let next = plan.add_task(select("SELECT 2"), &[slow]).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let results = PlanExecutor::default()
            .execute(&plan, &ScriptedClient::default(), &cancel)
            .await
            .unwrap();
        assert!(results.was_cancelled());
        assert_eq!(results.status(slow), Some(&TaskStatus::Cancelled));
        assert_eq!(results.status(next), Some(&TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let plan = ExecutionPlan::single(select("SELECT 1"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = ScriptedClient::default();
        let results = PlanExecutor::default()
            .execute(&plan, &client, &cancel)
            .await
            .unwrap();
        assert!(results.was_cancelled());
        assert!(client.seen.lock().unwrap().is_empty());
    }
}
