//! PostgreSQL dialect.
//!
//! Uses every default of `SqlDialect`: ANSI quoting, `DATE_TRUNC('grain', x)`,
//! interval multiplication for time shifts and exact ordered-set percentiles.

use super::helpers;
use super::SqlDialect;

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }
}
