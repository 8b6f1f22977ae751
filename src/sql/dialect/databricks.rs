//! Databricks (Spark SQL) dialect.
//!
//! Databricks features:
//! - Backtick identifier quoting
//! - `DATEADD(unit, n, x)` time arithmetic
//! - `PERCENTILE(x, p)` and `APPROX_PERCENTILE(x, p)` aggregates

use super::helpers;
use super::SqlDialect;
use crate::model::time::{DatePart, TimeGranularity};
use crate::sql::expr::SqlPercentileFunctionType;
use crate::sql::token::TokenStream;

/// Databricks SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Databricks;

impl SqlDialect for Databricks {
    fn name(&self) -> &'static str {
        "databricks"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn float_type_name(&self) -> &'static str {
        "DOUBLE"
    }

    fn date_part_keyword(&self, date_part: DatePart) -> &'static str {
        helpers::date_part_keyword_named(date_part)
    }

    fn render_time_shift(
        &self,
        arg: &TokenStream,
        count: &TokenStream,
        granularity: TimeGranularity,
        subtract: bool,
    ) -> TokenStream {
        helpers::time_shift_dateadd(arg, count, granularity, subtract)
    }

    fn supports_percentile(&self, function_type: SqlPercentileFunctionType) -> bool {
        !matches!(function_type, SqlPercentileFunctionType::Discrete)
    }

    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        match function_type {
            SqlPercentileFunctionType::Continuous => {
                helpers::percentile_two_arg("PERCENTILE", arg, percentile)
            }
            SqlPercentileFunctionType::ApproximateContinuous
            | SqlPercentileFunctionType::ApproximateDiscrete => {
                helpers::percentile_two_arg("APPROX_PERCENTILE", arg, percentile)
            }
            SqlPercentileFunctionType::Discrete => {
                helpers::percentile_within_group(arg, percentile, function_type)
            }
        }
    }

    fn render_generate_uuid(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function("UUID").rparen();
        ts
    }
}
