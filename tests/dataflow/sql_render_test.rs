#[path = "../common/mod.rs"]
mod common;

use meridian::dataflow::DataflowNode;
use serde_json::json;
use meridian::query::QueryRequest;
use meridian::sql::Dialect;

fn sql(request: QueryRequest, dialect: Dialect) -> String {
    common::engine()
        .explain_for_dialect(&request, dialect)
        .unwrap()
        .rendered
        .sql
}

#[test]
fn test_simple_query_parses_in_every_dialect() {
    let request = QueryRequest::new()
        .metric("bookings")
        .group_by("listing__country")
        .order_by("-bookings")
        .limit(5);
    for dialect in common::ALL_DIALECTS {
        let sql = sql(request.clone(), dialect);
        common::assert_valid_sql(&sql, dialect);
    }
    let duckdb = sql(request, Dialect::DuckDb);
    assert!(duckdb.starts_with("WITH"), "{}", duckdb);
    assert!(duckdb.contains("\"main\".\"dim_listings\""), "{}", duckdb);
    assert!(duckdb.contains("LIMIT 5"), "{}", duckdb);
}

#[test]
fn test_dataflow_shape_for_two_models() {
    let explanation = common::engine()
        .explain(
            &QueryRequest::new()
                .metric("bookings")
                .metric("listings")
                .group_by("listing__country"),
        )
        .unwrap();
    let nodes = explanation.dataflow_plan.nodes();
    let aggregates = nodes
        .iter()
        .filter(|n| matches!(n, DataflowNode::AggregateMeasures(_)))
        .count();
    assert_eq!(aggregates, 2);
    assert!(nodes
        .iter()
        .any(|n| matches!(n, DataflowNode::CombineAggregatedOutputs(_))));
    assert!(explanation.sql().contains("FULL OUTER JOIN"));
    assert_eq!(
        explanation.rendered.output_columns,
        vec!["listing__country", "bookings", "listings"]
    );
}

#[test]
fn test_ratio_casts_and_guards_division() {
    let sql = sql(
        QueryRequest::new()
            .metric("instant_booking_rate")
            .group_by("metric_time__day"),
        Dialect::Postgres,
    );
    assert!(sql.contains("NULLIF("), "{}", sql);
    assert!(sql.contains("CAST("), "{}", sql);
    common::assert_valid_sql(&sql, Dialect::Postgres);
}

#[test]
fn test_derived_expression_uses_input_columns() {
    let sql = sql(
        QueryRequest::new()
            .metric("booking_value_per_booking")
            .group_by("metric_time__day"),
        Dialect::Postgres,
    );
    assert!(sql.contains("\"booking_value\" / \"bookings\""), "{}", sql);
}

#[test]
fn test_offset_joins_shifted_time_spine() {
    let sql = sql(
        QueryRequest::new()
            .metric("bookings_growth_2_weeks")
            .group_by("metric_time__day"),
        Dialect::DuckDb,
    );
    assert!(sql.contains("\"main\".\"mf_time_spine\""), "{}", sql);
    assert!(sql.contains("14 * INTERVAL '1 day'"), "{}", sql);
    assert!(sql.contains("\"bookings\" - \"bookings__v0\""), "{}", sql);
}

#[test]
fn test_cumulative_joins_time_spine() {
    let sql = sql(
        QueryRequest::new()
            .metric("trailing_7d_bookings")
            .group_by("metric_time__day"),
        Dialect::DuckDb,
    );
    assert!(sql.contains("\"main\".\"mf_time_spine\""), "{}", sql);
    assert!(sql.contains("INTERVAL"), "{}", sql);
}

#[test]
fn test_cumulative_over_metric_sums_spine_periods() {
    // A day with no bookings still gets the trailing total, so the window
    // has to be a date range over spine periods rather than a row count.
    let engine = common::engine_with_metrics(vec![json!({
        "name": "trailing_7d_bookings_of_metric",
        "type": "cumulative",
        "type_params": {
            "cumulative_type_params": {"metric": {"name": "bookings"}, "window": "7 days"}
        }
    })]);
    let request = QueryRequest::new()
        .metric("trailing_7d_bookings_of_metric")
        .group_by("metric_time__day")
        .group_by("booking__is_instant");
    for dialect in common::ALL_DIALECTS {
        let rendered = engine.explain_for_dialect(&request, dialect).unwrap().rendered.sql;
        common::assert_valid_sql(&rendered, dialect);
    }
    let duckdb = engine
        .explain_for_dialect(&request, Dialect::DuckDb)
        .unwrap()
        .rendered
        .sql;
    assert!(duckdb.contains("\"main\".\"mf_time_spine\""), "{}", duckdb);
    assert!(duckdb.contains("\"s\".\"metric_time__day\""), "{}", duckdb);
    assert!(duckdb.contains("7 * INTERVAL '1 day'"), "{}", duckdb);
    assert!(duckdb.contains("\"s\".\"booking__is_instant\""), "{}", duckdb);
    assert!(!duckdb.contains("ROWS BETWEEN"), "{}", duckdb);
    assert!(!duckdb.contains(" OVER "), "{}", duckdb);
}

#[test]
fn test_cumulative_over_metric_respects_time_constraint() {
    let engine = common::engine_with_metrics(vec![json!({
        "name": "bookings_mtd_of_metric",
        "type": "cumulative",
        "type_params": {
            "cumulative_type_params": {"metric": {"name": "bookings"}, "grain_to_date": "month"}
        }
    })]);
    let rendered = engine
        .explain_for_dialect(
            &QueryRequest::new()
                .metric("bookings_mtd_of_metric")
                .group_by("metric_time__day")
                .time_constraint("2024-01-01", "2024-01-31"),
            Dialect::Postgres,
        )
        .unwrap()
        .rendered
        .sql;
    common::assert_valid_sql(&rendered, Dialect::Postgres);
    assert!(rendered.contains("\"metric_time__day\" BETWEEN"), "{}", rendered);
    assert!(!rendered.contains("ROWS BETWEEN"), "{}", rendered);
}

#[test]
fn test_conversion_with_measure_and_metric_inputs() {
    let engine = common::engine_with_metrics(vec![json!({
        "name": "visit_to_buy_rate_mixed",
        "type": "conversion",
        "type_params": {
            "conversion_type_params": {
                "base_measure": {"name": "visits"},
                "conversion_metric": {"name": "buys"},
                "entity": "user",
                "calculation": "conversion_rate"
            }
        }
    })]);
    let request = QueryRequest::new()
        .metric("visit_to_buy_rate_mixed")
        .group_by("metric_time__day");
    for dialect in common::ALL_DIALECTS {
        let rendered = engine.explain_for_dialect(&request, dialect).unwrap().rendered.sql;
        common::assert_valid_sql(&rendered, dialect);
    }
    let duckdb = engine
        .explain_for_dialect(&request, Dialect::DuckDb)
        .unwrap()
        .rendered
        .sql;
    assert!(duckdb.contains("\"main\".\"fct_visits\""), "{}", duckdb);
    assert!(duckdb.contains("\"main\".\"fct_buys\""), "{}", duckdb);
    assert!(duckdb.contains("COALESCE"), "{}", duckdb);
}

#[test]
fn test_conversion_matches_events_with_window_functions() {
    let sql = sql(
        QueryRequest::new()
            .metric("visit_buy_conversion_rate")
            .group_by("metric_time__day"),
        Dialect::DuckDb,
    );
    assert!(sql.contains("FIRST_VALUE"), "{}", sql);
    assert!(sql.contains("\"main\".\"fct_visits\""), "{}", sql);
    assert!(sql.contains("\"main\".\"fct_buys\""), "{}", sql);
}

#[test]
fn test_non_additive_dimension_uses_window() {
    let sql = sql(
        QueryRequest::new()
            .metric("total_account_balance_first_day")
            .group_by("metric_time__day"),
        Dialect::DuckDb,
    );
    assert!(sql.contains("FIRST_VALUE"), "{}", sql);
    assert!(sql.contains("PARTITION BY"), "{}", sql);
}

#[test]
fn test_filters_and_time_constraint() {
    let metric_filter = sql(
        QueryRequest::new().metric("us_bookings").group_by("metric_time__day"),
        Dialect::Postgres,
    );
    assert!(metric_filter.contains("\"listing__country\" = 'us'"), "{}", metric_filter);

    let constrained = sql(
        QueryRequest::new()
            .metric("bookings")
            .group_by("metric_time__day")
            .filter("{{ Dimension('booking__is_instant') }}")
            .time_constraint("2024-01-01", "2024-01-31"),
        Dialect::Postgres,
    );
    assert!(constrained.contains("\"booking__is_instant\""), "{}", constrained);
    assert!(constrained.contains("BETWEEN"), "{}", constrained);
    assert!(constrained.contains("'2024-01-31'"), "{}", constrained);
}

#[test]
fn test_distinct_values() {
    let countries = sql(QueryRequest::new().group_by("listing__country"), Dialect::DuckDb);
    assert!(countries.contains("SELECT DISTINCT"), "{}", countries);
    assert!(countries.contains("\"main\".\"dim_listings\""), "{}", countries);
    common::assert_valid_sql(&countries, Dialect::DuckDb);

    let times = sql(QueryRequest::new().group_by("metric_time__day"), Dialect::DuckDb);
    assert!(times.contains("\"main\".\"mf_time_spine\""), "{}", times);
}

#[test]
fn test_write_to_table() {
    let explanation = common::engine()
        .explain_for_dialect(
            &QueryRequest::new()
                .metric("bookings")
                .group_by("metric_time__day")
                .into_table("analytics.daily_bookings"),
            Dialect::Postgres,
        )
        .unwrap();
    assert!(explanation
        .sql()
        .starts_with("CREATE TABLE \"analytics\".\"daily_bookings\" AS ("));
    assert_eq!(
        explanation.rendered.output_table.as_deref(),
        Some("analytics.daily_bookings")
    );
    let task = explanation.execution_plan.tasks().next().unwrap();
    assert_eq!(task.description(), "create table analytics.daily_bookings");
}
