#[path = "../common/mod.rs"]
mod common;

use meridian::model::{
    load_manifest_str, ExpandedTimeGranularity, MeasureOrMetric, MetricTimeWindow, MetricType,
    TimeGranularity,
};

#[test]
fn test_fixture_loads() {
    let manifest = common::bookings_manifest();
    assert_eq!(manifest.semantic_models.len(), 6);
    assert_eq!(manifest.metrics.len(), 15);

    let bookings = manifest.get_semantic_model("bookings_source").unwrap();
    assert_eq!(bookings.node_relation.relation_name(), "main.fct_bookings");
    let measure = bookings.get_measure("bookings").unwrap();
    assert_eq!(measure.column_expr(), "1");
    assert_eq!(bookings.agg_time_dimension_for(measure), Some("ds"));
}

#[test]
fn test_metric_inputs() {
    let manifest = common::bookings_manifest();

    let growth = manifest.get_metric("bookings_growth_2_weeks").unwrap();
    assert_eq!(growth.metric_type, MetricType::Derived);
    let inputs = growth.input_metrics();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[1].output_name(), "bookings_2_weeks_ago");
    assert_eq!(
        inputs[1].offset_window,
        Some(MetricTimeWindow::new(14, TimeGranularity::Day))
    );

    let trailing = manifest.get_metric("trailing_7d_bookings").unwrap();
    assert_eq!(trailing.cumulative_window().map(|w| w.to_string()).as_deref(), Some("7 days"));
    assert!(matches!(
        trailing.cumulative_input(),
        Some(MeasureOrMetric::Measure(m)) if m.name == "bookings"
    ));

    let mtd = manifest.get_metric("bookings_mtd").unwrap();
    assert_eq!(mtd.cumulative_grain_to_date(), Some(TimeGranularity::Month));
    assert!(mtd.cumulative_window().is_none());
}

#[test]
fn test_time_spines() {
    let manifest = common::bookings_manifest();
    let spine = manifest.time_spine_for(TimeGranularity::Month).unwrap();
    assert_eq!(spine.node_relation.alias, "mf_time_spine");
    assert!(manifest.time_spine_for(TimeGranularity::Hour).is_none());

    let (_, column) = manifest.time_spine_for_custom("fiscal_quarter").unwrap();
    assert_eq!(column, "fiscal_qtr");
    assert_eq!(
        manifest.custom_granularities(),
        vec![ExpandedTimeGranularity::custom("fiscal_quarter", TimeGranularity::Day)]
    );
}

#[test]
fn test_fingerprint_tracks_content() {
    let manifest = common::bookings_manifest();
    let first = manifest.fingerprint().unwrap();
    assert_eq!(first.len(), 64);
    assert_eq!(first, common::bookings_manifest().fingerprint().unwrap());

    let mut changed = manifest.clone();
    changed.metrics.pop();
    assert_ne!(first, changed.fingerprint().unwrap());
}

#[test]
fn test_inline_aggregation_becomes_measure() {
    let manifest = load_manifest_str(
        r#"{
            "semantic_models": [{
                "name": "orders",
                "node_relation": {"alias": "fct_orders", "schema_name": "main"},
                "defaults": {"agg_time_dimension": "ordered_at"},
                "entities": [{"name": "order", "type": "primary"}],
                "measures": [],
                "dimensions": [{"name": "ordered_at", "type": "time"}]
            }],
            "metrics": [{
                "name": "order_total",
                "type": "simple",
                "type_params": {
                    "metric_aggregation_params": {
                        "semantic_model": "orders",
                        "agg": "sum",
                        "expr": "amount"
                    }
                }
            }]
        }"#,
    )
    .unwrap();

    let orders = manifest.get_semantic_model("orders").unwrap();
    let measure = orders.get_measure("order_total").unwrap();
    assert_eq!(measure.column_expr(), "amount");
    let metric = manifest.get_metric("order_total").unwrap();
    assert_eq!(
        metric.type_params.measure.as_ref().map(|m| m.name.as_str()),
        Some("order_total")
    );
    assert!(metric.type_params.metric_aggregation_params.is_none());
}

#[test]
fn test_invalid_json_is_an_error() {
    assert!(load_manifest_str("{\"metrics\": 3}").is_err());
}
