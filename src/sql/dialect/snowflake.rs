//! Snowflake SQL dialect.
//!
//! Snowflake features:
//! - ANSI identifier quoting (`"`)
//! - `DATEADD(unit, n, x)` time arithmetic
//! - `APPROX_PERCENTILE` for approximate continuous percentiles
//! - `UUID_STRING()` for random identifiers

use super::helpers;
use super::SqlDialect;
use crate::model::time::{DatePart, TimeGranularity};
use crate::sql::expr::SqlPercentileFunctionType;
use crate::sql::token::TokenStream;

/// Snowflake SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
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
        !matches!(function_type, SqlPercentileFunctionType::ApproximateDiscrete)
    }

    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        match function_type {
            SqlPercentileFunctionType::ApproximateContinuous => {
                helpers::percentile_two_arg("APPROX_PERCENTILE", arg, percentile)
            }
            SqlPercentileFunctionType::Continuous
            | SqlPercentileFunctionType::Discrete
            | SqlPercentileFunctionType::ApproximateDiscrete => {
                helpers::percentile_within_group(arg, percentile, function_type)
            }
        }
    }

    fn render_generate_uuid(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function("UUID_STRING").rparen();
        ts
    }
}
