//! Amazon Redshift SQL dialect.
//!
//! Redshift is PostgreSQL-derived, but:
//! - Time arithmetic uses `DATEADD(unit, n, x)`
//! - Approximate percentiles only exist in the discrete form
//! - No native UUID generator; an MD5 of random input stands in

use super::helpers;
use super::SqlDialect;
use crate::model::time::TimeGranularity;
use crate::sql::expr::SqlPercentileFunctionType;
use crate::sql::token::{Token, TokenStream};

/// Amazon Redshift SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Redshift;

impl SqlDialect for Redshift {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
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
        !matches!(
            function_type,
            SqlPercentileFunctionType::ApproximateContinuous
        )
    }

    fn render_percentile(
        &self,
        arg: &TokenStream,
        percentile: f64,
        function_type: SqlPercentileFunctionType,
    ) -> TokenStream {
        let exact = helpers::percentile_within_group(arg, percentile, function_type);
        match function_type {
            SqlPercentileFunctionType::ApproximateDiscrete => {
                let mut ts = TokenStream::new();
                ts.push(Token::Raw("APPROXIMATE".into())).space().append(&exact);
                ts
            }
            SqlPercentileFunctionType::Continuous
            | SqlPercentileFunctionType::Discrete
            | SqlPercentileFunctionType::ApproximateContinuous => exact,
        }
    }

    fn render_generate_uuid(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Raw(
            "MD5(CAST(RANDOM() AS VARCHAR) || CAST(GETDATE() AS VARCHAR))".into(),
        ));
        ts
    }
}
