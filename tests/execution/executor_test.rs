#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meridian::execution::{
    CancellationToken, DataTable, ExecutionPlan, ExecutionPlanTask, PlanExecutor,
    SelectSqlQueryToDataTableTask, SqlClient, SqlClientError, TaskStatus,
};
use meridian::query::QueryRequest;
use meridian::sql::{Dialect, SqlBindParameters};
use serde_json::json;

/// In-memory warehouse that records every statement it receives.
struct MockClient {
    dialect: Dialect,
    failure: Option<SqlClientError>,
    delay: Duration,
    statements: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockClient {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            failure: None,
            delay: Duration::ZERO,
            statements: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, error: SqlClientError) -> Self {
        self.failure = Some(error);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    async fn run(&self, statement: String) -> Result<(), SqlClientError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.statements.lock().unwrap().push(statement);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlClient for MockClient {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(
        &self,
        sql: &str,
        _bind_parameters: &SqlBindParameters,
    ) -> Result<DataTable, SqlClientError> {
        self.run(sql.to_string()).await?;
        Ok(DataTable::new(
            vec!["metric_time__day".into(), "bookings".into()],
            vec![
                vec![json!("2024-01-01"), json!(12)],
                vec![json!("2024-01-02"), json!(9)],
            ],
        ))
    }

    async fn execute(
        &self,
        sql: &str,
        _bind_parameters: &SqlBindParameters,
    ) -> Result<(), SqlClientError> {
        self.run(format!("execute: {}", sql)).await
    }
}

fn bookings_by_day() -> QueryRequest {
    QueryRequest::new().metric("bookings").group_by("metric_time__day")
}

fn select(sql: &str) -> Arc<dyn ExecutionPlanTask> {
    Arc::new(SelectSqlQueryToDataTableTask::new(sql, SqlBindParameters::new()))
}

#[tokio::test]
async fn test_query_returns_rows_in_client_dialect() {
    let client = MockClient::new(Dialect::BigQuery);
    let results = common::engine()
        .query(&bookings_by_day(), &client, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!results.contains_task_errors());
    let table = results.data_table().unwrap();
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.get(0, "bookings"), Some(&json!(12)));

    let statements = client.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("`fct_bookings`"), "{}", statements[0]);
}

#[tokio::test]
async fn test_warehouse_failure_is_reported_not_raised() {
    let client = MockClient::new(Dialect::DuckDb)
        .failing(SqlClientError::QueryFailed("warehouse down".into()));
    let results = common::engine()
        .query(&bookings_by_day(), &client, &CancellationToken::new())
        .await
        .unwrap();

    assert!(results.contains_task_errors());
    assert!(results.data_table().is_none());
    let messages = results.error_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("query failed: warehouse down"), "{}", messages[0]);

    let (_, status) = &results.statuses()[0];
    let result = status.result().unwrap();
    assert!(matches!(status, TaskStatus::Failed(_)));
    assert!(result.errors[0].sql.is_some());
}

#[tokio::test]
async fn test_table_output_executes_statement() {
    let client = MockClient::new(Dialect::Postgres);
    let request = bookings_by_day().into_table("analytics.daily_bookings");
    let results = common::engine()
        .query(&request, &client, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!results.contains_task_errors());
    assert!(results.data_table().is_none());
    let statements = client.statements();
    assert!(
        statements[0].starts_with("execute: CREATE TABLE \"analytics\".\"daily_bookings\""),
        "{}",
        statements[0]
    );
}

#[tokio::test]
async fn test_cancel_stops_running_query() {
    let client = MockClient::new(Dialect::DuckDb).slow(Duration::from_secs(3600));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let results = common::engine()
        .query(&bookings_by_day(), &client, &cancel)
        .await
        .unwrap();
    assert!(results.was_cancelled());
    assert!(results.contains_task_errors());
    assert!(results.data_table().is_none());
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let mut plan = ExecutionPlan::new();
    for i in 0..6 {
        plan.add_task(select(&format!("SELECT {}", i)), &[]).unwrap();
    }
    let client = MockClient::new(Dialect::DuckDb).slow(Duration::from_millis(10));
    let results = PlanExecutor::new(2)
        .execute(&plan, &client, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!results.contains_task_errors());
    assert_eq!(client.statements().len(), 6);
    assert!(client.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_dependencies_run_in_order() {
    let mut plan = ExecutionPlan::new();
    let a = plan.add_task(select("SELECT 'a'"), &[]).unwrap();
    let b = plan.add_task(select("SELECT 'b'"), &[a]).unwrap();
    let c = plan.add_task(select("SELECT 'c'"), &[a]).unwrap();
    plan.add_task(select("SELECT 'd'"), &[b, c]).unwrap();

    let client = MockClient::new(Dialect::DuckDb);
    let results = PlanExecutor::default()
        .execute(&plan, &client, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!results.contains_task_errors());
    let order = client.statements();
    assert_eq!(order.first().map(String::as_str), Some("SELECT 'a'"));
    assert_eq!(order.last().map(String::as_str), Some("SELECT 'd'"));
    assert_eq!(plan.waves().unwrap().len(), 3);
}
