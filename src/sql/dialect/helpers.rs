//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use super::super::expr::SqlPercentileFunctionType;
use super::super::token::{Keyword, Operator, Token, TokenStream};
use crate::model::time::{DatePart, TimeGranularity};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, Snowflake, Redshift
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: BigQuery, Databricks
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with single quotes and backslash escaping.
/// Used by: BigQuery, Databricks
pub fn quote_string_backslash(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

// =============================================================================
// Date Parts
// =============================================================================

/// Postgres / DuckDB keywords, ISO day-of-week.
pub fn date_part_keyword_iso(date_part: DatePart) -> &'static str {
    match date_part {
        DatePart::Year => "year",
        DatePart::Quarter => "quarter",
        DatePart::Month => "month",
        DatePart::Day => "day",
        DatePart::Dow => "isodow",
        DatePart::Doy => "doy",
    }
}

/// Snowflake / Databricks keywords.
pub fn date_part_keyword_named(date_part: DatePart) -> &'static str {
    match date_part {
        DatePart::Year => "year",
        DatePart::Quarter => "quarter",
        DatePart::Month => "month",
        DatePart::Day => "day",
        DatePart::Dow => "dayofweekiso",
        DatePart::Doy => "doy",
    }
}

// =============================================================================
// Time Arithmetic
// =============================================================================

/// Interval multiplier and unit for dialects whose interval literals do not
/// accept every granularity (quarters become three months).
pub fn interval_unit(granularity: TimeGranularity) -> (i64, &'static str) {
    match granularity {
        TimeGranularity::Quarter => (3, "month"),
        other => (1, other.name()),
    }
}

/// `<arg> +/- <count> * INTERVAL '<n> <unit>'`.
/// Used by: Postgres, DuckDB
pub fn time_shift_interval_multiply(
    arg: &TokenStream,
    count: &TokenStream,
    granularity: TimeGranularity,
    subtract: bool,
) -> TokenStream {
    let (multiplier, unit) = interval_unit(granularity);
    let mut ts = TokenStream::new();
    ts.append(arg)
        .space()
        .push(if subtract { Operator::Minus } else { Operator::Plus })
        .space()
        .append(count)
        .space()
        .push(Operator::Mul)
        .space()
        .push(Keyword::Interval)
        .space()
        .push(Token::LitString(format!("{} {}", multiplier, unit)));
    ts
}

/// `DATEADD(<unit>, [-]<count>, <arg>)`.
/// Used by: Snowflake, Redshift, Databricks
pub fn time_shift_dateadd(
    arg: &TokenStream,
    count: &TokenStream,
    granularity: TimeGranularity,
    subtract: bool,
) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.function("DATEADD")
        .push(Token::Word(granularity.name().into()))
        .comma()
        .space();
    if subtract {
        ts.push(Operator::Minus);
    }
    ts.append(count).comma().space().append(arg).rparen();
    ts
}

// =============================================================================
// Percentiles
// =============================================================================

/// `PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY arg)` and the discrete form.
pub fn percentile_within_group(
    arg: &TokenStream,
    percentile: f64,
    function_type: SqlPercentileFunctionType,
) -> TokenStream {
    let name = match function_type {
        SqlPercentileFunctionType::Discrete | SqlPercentileFunctionType::ApproximateDiscrete => {
            "PERCENTILE_DISC"
        }
        SqlPercentileFunctionType::Continuous
        | SqlPercentileFunctionType::ApproximateContinuous => "PERCENTILE_CONT",
    };
    let mut ts = TokenStream::new();
    ts.function(name)
        .push(Token::LitFloat(percentile))
        .rparen()
        .space()
        .push(Keyword::WithinGroup)
        .space()
        .lparen()
        .push(Keyword::OrderBy)
        .space()
        .append(arg)
        .rparen();
    ts
}

/// `<FUNCTION>(arg, p)`, used for approximate percentile aggregates.
pub fn percentile_two_arg(function: &str, arg: &TokenStream, percentile: f64) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.function(function)
        .append(arg)
        .comma()
        .space()
        .push(Token::LitFloat(percentile))
        .rparen();
    ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;

    #[test]
    fn test_quote_double_escapes() {
        assert_eq!(quote_double("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_backtick_escapes() {
        assert_eq!(quote_backtick("a`b"), "`a``b`");
    }

    #[test]
    fn test_quote_string_backslash() {
        assert_eq!(quote_string_backslash("it's"), "'it\\'s'");
    }

    #[test]
    fn test_percentile_within_group() {
        let arg = TokenStream::from(Token::Ident("price".into()));
        let ts = percentile_within_group(&arg, 0.5, SqlPercentileFunctionType::Discrete);
        assert_eq!(
            ts.serialize(Dialect::Postgres),
            "PERCENTILE_DISC(0.5) WITHIN GROUP (ORDER BY \"price\")"
        );
    }

    #[test]
    fn test_interval_unit() {
        assert_eq!(interval_unit(TimeGranularity::Quarter), (3, "month"));
        assert_eq!(interval_unit(TimeGranularity::Week), (1, "week"));
    }
}
