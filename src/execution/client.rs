//! The warehouse boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::SqlClientError;
use crate::sql::{Dialect, SqlBindParameters};

/// Rows returned by a query, one JSON value per cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl DataTable {
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { column_names, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// Cell at `row` in the column named `column`.
    pub fn get(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Every value of one column, in row order.
    pub fn column_values(&self, column: &str) -> Option<Vec<&serde_json::Value>> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }
}

/// Runs SQL against a warehouse.
///
/// Implementations must be safe to call concurrently: the executor issues
/// independent tasks in parallel.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Dialect the client's warehouse speaks.
    fn dialect(&self) -> Dialect;

    /// Run a SELECT and return its rows.
    async fn query(
        &self,
        sql: &str,
        bind_parameters: &SqlBindParameters,
    ) -> Result<DataTable, SqlClientError>;

    /// Run a statement that returns no rows.
    async fn execute(
        &self,
        sql: &str,
        bind_parameters: &SqlBindParameters,
    ) -> Result<(), SqlClientError>;
}
