//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible with extensions:
//! - ANSI identifier quoting (`"`)
//! - `DOUBLE` float type
//! - `APPROX_QUANTILE` for approximate continuous percentiles

use super::helpers;
use super::SqlDialect;
use crate::sql::expr::SqlPercentileFunctionType;
use crate::sql::token::TokenStream;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn float_type_name(&self) -> &'static str {
        "DOUBLE"
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
                helpers::percentile_two_arg("APPROX_QUANTILE", arg, percentile)
            }
            SqlPercentileFunctionType::Continuous
            | SqlPercentileFunctionType::Discrete
            | SqlPercentileFunctionType::ApproximateDiscrete => {
                helpers::percentile_within_group(arg, percentile, function_type)
            }
        }
    }
}
