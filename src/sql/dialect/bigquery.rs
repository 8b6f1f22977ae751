//! BigQuery SQL dialect.
//!
//! BigQuery features:
//! - Backtick identifier quoting
//! - `DATE_TRUNC(x, grain)` argument order
//! - `DATE_ADD(x, INTERVAL n unit)` time arithmetic
//! - Only approximate discrete percentiles in aggregate position
//!   (`APPROX_QUANTILES(x, 100)[OFFSET(n)]`)

use super::helpers;
use super::SqlDialect;
use crate::model::time::{DatePart, TimeGranularity};
use crate::sql::expr::SqlPercentileFunctionType;
use crate::sql::token::{Keyword, Token, TokenStream};

/// BigQuery SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_backslash(s)
    }

    fn float_type_name(&self) -> &'static str {
        "FLOAT64"
    }

    fn timestamp_type_name(&self) -> &'static str {
        "DATETIME"
    }

    fn render_date_trunc(&self, granularity: TimeGranularity, arg: &TokenStream) -> TokenStream {
        let unit = match granularity {
            TimeGranularity::Week => "isoweek",
            other => other.name(),
        };
        let mut ts = TokenStream::new();
        ts.function("DATE_TRUNC")
            .append(arg)
            .comma()
            .space()
            .push(Token::Word(unit.into()))
            .rparen();
        ts
    }

    fn date_part_keyword(&self, date_part: DatePart) -> &'static str {
        match date_part {
            DatePart::Dow => "dayofweek",
            DatePart::Doy => "dayofyear",
            other => helpers::date_part_keyword_iso(other),
        }
    }

    fn render_time_shift(
        &self,
        arg: &TokenStream,
        count: &TokenStream,
        granularity: TimeGranularity,
        subtract: bool,
    ) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function(if subtract { "DATE_SUB" } else { "DATE_ADD" })
            .append(arg)
            .comma()
            .space()
            .push(Keyword::Interval)
            .space()
            .append(count)
            .space()
            .push(Token::Word(granularity.name().into()))
            .rparen();
        ts
    }

    fn supports_percentile(&self, function_type: SqlPercentileFunctionType) -> bool {
        matches!(function_type, SqlPercentileFunctionType::ApproximateDiscrete)
    }

    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        match function_type {
            SqlPercentileFunctionType::ApproximateDiscrete => {
                let offset = (percentile * 100.0).round() as i64;
                let mut ts = TokenStream::new();
                ts.function("APPROX_QUANTILES")
                    .append(arg)
                    .comma()
                    .space()
                    .push(Token::LitInt(100))
                    .rparen()
                    .push(Token::Raw(format!("[OFFSET({})]", offset)));
                ts
            }
            SqlPercentileFunctionType::Continuous
            | SqlPercentileFunctionType::Discrete
            | SqlPercentileFunctionType::ApproximateContinuous => {
                helpers::percentile_within_group(arg, percentile, function_type)
            }
        }
    }

    fn render_generate_uuid(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.function("GENERATE_UUID").rparen();
        ts
    }
}
