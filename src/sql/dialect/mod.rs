//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (ANSI/PG/DuckDB/Snowflake/Redshift), `` ` `` (BigQuery/Databricks)
//! - Time arithmetic: interval multiplication vs `DATEADD` vs `DATE_ADD(.., INTERVAL ..)`
//! - `DATE_TRUNC` argument order
//! - Percentile aggregates and their approximate variants
//! - Random UUID generation
//!
//! # Feature Support
//!
//! | Feature | DuckDB | Postgres | Snowflake | BigQuery | Redshift | Databricks |
//! |---------|--------|----------|-----------|----------|----------|------------|
//! | PERCENTILE_CONT/DISC | ✓ | ✓ | ✓ | ❌ | ✓ | cont only |
//! | Approximate percentile | cont | ❌ | cont | disc | disc | ✓ |
//! | FULL OUTER JOIN | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ |
//!
//! Check `supports_percentile()` before planning a query that uses percentile
//! measures.

mod bigquery;
mod databricks;
mod duckdb;
pub mod helpers;
mod postgres;
mod redshift;
mod snowflake;

pub use bigquery::BigQuery;
pub use databricks::Databricks;
pub use duckdb::DuckDb;
pub use postgres::Postgres;
pub use redshift::Redshift;
pub use snowflake::Snowflake;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::expr::SqlPercentileFunctionType;
use super::token::{Keyword, Token, TokenStream};
use crate::model::time::{DatePart, TimeGranularity};

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI / PostgreSQL syntax.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    fn emit_limit(&self, limit: u64) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Keyword::Limit)
            .space()
            .push(Token::LitInt(limit as i64));
        ts
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Type used when casting ratio operands to avoid integer division.
    fn float_type_name(&self) -> &'static str {
        "DOUBLE PRECISION"
    }

    fn timestamp_type_name(&self) -> &'static str {
        "TIMESTAMP"
    }

    // =========================================================================
    // Date/Time
    // =========================================================================

    /// `DATE_TRUNC('<granularity>', <arg>)`.
    fn render_date_trunc(&self, granularity: TimeGranularity, arg: &TokenStream) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function("DATE_TRUNC")
            .push(Token::LitString(granularity.name().into()))
            .comma()
            .space()
            .append(arg)
            .rparen();
        ts
    }

    /// Keyword used inside `EXTRACT(<part> FROM ...)`.
    fn date_part_keyword(&self, date_part: DatePart) -> &'static str {
        helpers::date_part_keyword_iso(date_part)
    }

    /// Shift `arg` by `count` units of `granularity`. `count` is rendered
    /// as an operand and may be any integer-valued expression.
    fn render_time_shift(
        &self,
        arg: &TokenStream,
        count: &TokenStream,
        granularity: TimeGranularity,
        subtract: bool,
    ) -> TokenStream {
        helpers::time_shift_interval_multiply(arg, count, granularity, subtract)
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn supports_percentile(&self, function_type: SqlPercentileFunctionType) -> bool {
        matches!(
            function_type,
            SqlPercentileFunctionType::Continuous | SqlPercentileFunctionType::Discrete
        )
    }

    /// Percentile aggregate over `arg`. Callers check `supports_percentile`
    /// first; unsupported kinds fall back to the exact ordered-set form.
    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        helpers::percentile_within_group(arg, percentile, function_type)
    }

    // =========================================================================
    // Misc
    // =========================================================================

    fn render_generate_uuid(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function("GEN_RANDOM_UUID").rparen();
        ts
    }
}

/// Supported SQL dialects.
///
/// This enum provides a convenient way to select a dialect at runtime.
/// Each variant delegates to its corresponding `SqlDialect` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    Postgres,
    Snowflake,
    BigQuery,
    Redshift,
    Databricks,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Dialect::DuckDb,
        Dialect::Postgres,
        Dialect::Snowflake,
        Dialect::BigQuery,
        Dialect::Redshift,
        Dialect::Databricks,
    ];

    /// Get the dialect implementation.
    fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::Snowflake => &Snowflake,
            Dialect::BigQuery => &BigQuery,
            Dialect::Redshift => &Redshift,
            Dialect::Databricks => &Databricks,
        }
    }
}

impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn emit_limit(&self, limit: u64) -> TokenStream {
        self.dialect().emit_limit(limit)
    }

    fn float_type_name(&self) -> &'static str {
        self.dialect().float_type_name()
    }

    fn timestamp_type_name(&self) -> &'static str {
        self.dialect().timestamp_type_name()
    }

    fn render_date_trunc(&self, granularity: TimeGranularity, arg: &TokenStream) -> TokenStream {
        self.dialect().render_date_trunc(granularity, arg)
    }

    fn date_part_keyword(&self, date_part: DatePart) -> &'static str {
        self.dialect().date_part_keyword(date_part)
    }

    fn render_time_shift(
        &self,
        arg: &TokenStream,
        count: &TokenStream,
        granularity: TimeGranularity,
        subtract: bool,
    ) -> TokenStream {
        self.dialect()
            .render_time_shift(arg, count, granularity, subtract)
    }

    fn supports_percentile(&self, function_type: SqlPercentileFunctionType) -> bool {
        self.dialect().supports_percentile(function_type)
    }

    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        self.dialect()
            .render_percentile(arg, percentile, function_type)
    }

    fn render_generate_uuid(&self) -> TokenStream {
        self.dialect().render_generate_uuid()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Dialect::ALL
            .into_iter()
            .find(|d| d.name() == lowered)
            .ok_or_else(|| format!("unknown SQL dialect '{}'", s))
    }
}
