//! Syntax checks through `sqlparser`.
//!
//! Rendered queries are checked against the parser dialect matching the
//! target warehouse; author-written fragments (derived metric expressions)
//! against the generic dialect.

use sqlparser::dialect::{
    BigQueryDialect, DatabricksDialect, DuckDbDialect, GenericDialect, PostgreSqlDialect,
    RedshiftSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::{Parser, ParserError};

use super::dialect::Dialect;

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid SQL for {dialect}: {message}")]
pub struct SqlSyntaxError {
    pub dialect: String,
    pub message: String,
}

impl SqlSyntaxError {
    fn new(dialect: impl Into<String>, error: ParserError) -> Self {
        Self {
            dialect: dialect.into(),
            message: error.to_string(),
        }
    }
}

fn parser_dialect(dialect: Dialect) -> Box<dyn sqlparser::dialect::Dialect> {
    match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
        Dialect::Redshift => Box::new(RedshiftSqlDialect {}),
        Dialect::Databricks => Box::new(DatabricksDialect {}),
    }
}

/// Parse one or more statements in the given dialect.
pub fn check_statements(sql: &str, dialect: Dialect) -> Result<(), SqlSyntaxError> {
    Parser::parse_sql(&*parser_dialect(dialect), sql)
        .map(|_| ())
        .map_err(|e| SqlSyntaxError::new(dialect.to_string(), e))
}

/// Parse a single scalar expression, e.g. `bookings / NULLIF(listings, 0)`.
pub fn check_expression(expr: &str) -> Result<(), SqlSyntaxError> {
    Parser::new(&GenericDialect {})
        .try_with_sql(expr)
        .and_then(|mut parser| parser.parse_expr())
        .map(|_| ())
        .map_err(|e| SqlSyntaxError::new("generic", e))
}
