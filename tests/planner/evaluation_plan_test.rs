#[path = "../common/mod.rs"]
mod common;

use meridian::engine::QueryEngine;
use meridian::model::{MetricTimeWindow, TimeGranularity};
use meridian::planner::{BaseQueryKind, EvaluationPlan, MetricDescriptor, MetricOffset};
use meridian::query::QueryRequest;
use serde_json::json;

fn plan(engine: &QueryEngine, metrics: &[&str]) -> EvaluationPlan {
    let request = metrics
        .iter()
        .fold(QueryRequest::new(), |request, m| request.metric(*m))
        .group_by("metric_time__day");
    engine.explain(&request).unwrap().evaluation_plan.unwrap()
}

#[test]
fn test_simple_metrics_of_one_model_share_a_scan() {
    let plan = plan(&common::engine(), &["bookings", "instant_bookings", "booking_value"]);
    let bases: Vec<_> = plan.base_queries().collect();
    assert_eq!(bases.len(), 1);
    assert_eq!(bases[0].key.semantic_model, "bookings_source");
    assert_eq!(bases[0].key.kind, BaseQueryKind::Standard);
    assert_eq!(bases[0].computed.len(), 3);
    assert_eq!(plan.max_level(), 0);
}

#[test]
fn test_ratio_reuses_requested_input() {
    let plan = plan(&common::engine(), &["instant_booking_rate", "bookings"]);
    let bases: Vec<_> = plan.base_queries().collect();
    assert_eq!(bases.len(), 1);
    assert_eq!(
        bases[0].computed,
        vec![
            MetricDescriptor::plain("bookings"),
            MetricDescriptor::plain("instant_bookings")
        ]
    );
    assert_eq!(plan.level_of(&MetricDescriptor::plain("instant_booking_rate")), Some(1));

    let top = plan.query(plan.top()).unwrap();
    assert!(top.outputs_descriptor(&MetricDescriptor::plain("bookings")));
    assert!(top.outputs_descriptor(&MetricDescriptor::plain("instant_booking_rate")));
}

#[test]
fn test_offset_input_gets_its_own_base_query() {
    let plan = plan(&common::engine(), &["bookings_growth_2_weeks"]);
    let offset = MetricOffset::Window(MetricTimeWindow::new(14, TimeGranularity::Day));

    let bases: Vec<_> = plan.base_queries().collect();
    assert_eq!(bases.len(), 2);
    assert_eq!(bases.iter().filter(|b| b.key.offset == Some(offset.clone())).count(), 1);

    let shifted = MetricDescriptor {
        alias: Some("bookings_2_weeks_ago".into()),
        offset: Some(offset),
        ..MetricDescriptor::plain("bookings")
    };
    assert_eq!(plan.column_name(&shifted), Some("bookings__v0"));
    assert_eq!(plan.column_name(&MetricDescriptor::plain("bookings")), Some("bookings"));
}

#[test]
fn test_cumulative_kinds_are_separate_batches() {
    let plan = plan(&common::engine(), &["trailing_7d_bookings", "bookings_mtd", "bookings"]);
    let kinds: Vec<_> = plan.base_queries().map(|b| b.key.kind.clone()).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&BaseQueryKind::Standard));
    assert!(kinds.iter().any(|k| matches!(
        k,
        BaseQueryKind::Cumulative { window: Some(w), grain_to_date: None, .. } if w.count == 7
    )));
    assert!(kinds.iter().any(|k| matches!(
        k,
        BaseQueryKind::Cumulative { window: None, grain_to_date: Some(TimeGranularity::Month), .. }
    )));
}

#[test]
fn test_conversion_base_query() {
    let plan = plan(&common::engine(), &["visit_buy_conversion_rate"]);
    let bases: Vec<_> = plan.base_queries().collect();
    assert_eq!(bases.len(), 1);
    assert_eq!(bases[0].key.semantic_model, "visits_source");
    assert!(matches!(
        &bases[0].key.kind,
        BaseQueryKind::Conversion { metric, .. } if metric == "visit_buy_conversion_rate"
    ));
}

#[test]
fn test_mixed_conversion_plans_both_inputs() {
    let engine = common::engine_with_metrics(vec![json!({
        "name": "visit_to_buy_mixed",
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
    let plan = plan(&engine, &["visit_to_buy_mixed"]);
    let mixed = MetricDescriptor::plain("visit_to_buy_mixed");
    assert_eq!(
        plan.inputs_of(&mixed),
        &[MetricDescriptor::plain("visits"), MetricDescriptor::plain("buys")]
    );
    assert_eq!(plan.level_of(&mixed), Some(1));
    assert!(plan
        .base_queries()
        .all(|base| base.key.kind == BaseQueryKind::Standard));
}

#[test]
fn test_plans_are_stable_across_requests() {
    let engine = common::engine();
    let first = plan(&engine, &["booking_value_per_booking", "bookings_growth_2_weeks"]).to_string();
    let second = plan(&engine, &["booking_value_per_booking", "bookings_growth_2_weeks"]).to_string();
    assert_eq!(first, second);
    assert!(first.starts_with("Evaluation plan (max level 1):"));
    assert!(first.lines().any(|l| l.starts_with("* ")));
}

#[test]
fn test_single_metric_plan_display() {
    let plan = plan(&common::engine(), &["bookings"]);
    insta::assert_snapshot!(plan.to_string().trim_end(), @r"
    Evaluation plan (max level 0):
      q0 base bookings_source (ds): computes bookings
    * q1 from [q0]: passes bookings
    ");
}
