#[path = "../common/mod.rs"]
mod common;

use meridian::config::Settings;
use meridian::engine::EngineError;
use meridian::query::QueryRequest;
use meridian::semantic::{LinkableElementFilter, LinkableElementProperty, SemanticError};

fn names(metrics: &[&str]) -> Vec<String> {
    common::engine()
        .linkable_elements_for_metrics(metrics, &LinkableElementFilter::default())
        .unwrap()
        .qualified_names()
}

fn semantic_error(request: QueryRequest) -> SemanticError {
    match common::engine().explain(&request) {
        Err(EngineError::Semantic(e)) => e,
        other => panic!("expected a semantic error, got {:?}", other.map(|e| e.rendered.sql)),
    }
}

#[test]
fn test_metrics_from_different_models_intersect() {
    let names = names(&["bookings", "listings"]);
    assert!(names.contains(&"listing__country".to_string()));
    assert!(names.contains(&"metric_time__day".to_string()));
    assert!(!names.contains(&"booking__is_instant".to_string()));
}

#[test]
fn test_multi_hop_follows_max_entity_links() {
    assert!(names(&["bookings"]).contains(&"listing__user__home_state".to_string()));

    let mut settings = Settings::default();
    settings.planner.max_entity_links = 1;
    let single_hop = common::engine_with(settings)
        .linkable_elements_for_metrics(&["bookings"], &LinkableElementFilter::default())
        .unwrap()
        .qualified_names();
    assert!(single_hop.contains(&"listing__country".to_string()));
    assert!(!single_hop.contains(&"listing__user__home_state".to_string()));
}

#[test]
fn test_property_filter() {
    let engine = common::engine();
    let metric_time = engine
        .linkable_elements_for_metrics(
            &["bookings"],
            &LinkableElementFilter::with_any_of([LinkableElementProperty::MetricTime]),
        )
        .unwrap()
        .qualified_names();
    assert!(!metric_time.is_empty());
    assert!(metric_time.iter().all(|n| n.starts_with("metric_time")));

    let without = engine
        .linkable_elements_for_metrics(
            &["bookings"],
            &LinkableElementFilter::without_any_of([LinkableElementProperty::MultiHop]),
        )
        .unwrap()
        .qualified_names();
    assert!(!without.contains(&"listing__user__home_state".to_string()));
    assert!(without.contains(&"listing__country".to_string()));
}

#[test]
fn test_cumulative_metric_keeps_only_native_metric_time() {
    let names = names(&["trailing_7d_bookings"]);
    assert!(names.contains(&"metric_time__day".to_string()));
    assert!(!names.contains(&"metric_time__month".to_string()));
}

#[test]
fn test_conversion_metric_uses_base_measure_elements() {
    let names = names(&["visit_buy_conversion_rate"]);
    assert!(names.contains(&"user__home_state".to_string()));
    assert!(names.contains(&"metric_time__day".to_string()));
}

#[test]
fn test_dimension_values_elements() {
    let names = common::engine()
        .dimension_values_elements(&LinkableElementFilter::default())
        .unwrap()
        .qualified_names();
    assert!(names.contains(&"listing__country".to_string()));
    assert!(names.contains(&"user__home_state".to_string()));
    assert!(names.contains(&"metric_time__day".to_string()));
    assert!(!names.contains(&"listing__user__home_state".to_string()));
}

#[test]
fn test_unreachable_group_by() {
    let err = semantic_error(QueryRequest::new().metric("listings").group_by("booking__is_instant"));
    assert_eq!(
        err,
        SemanticError::UnknownGroupBy {
            name: "booking__is_instant".into(),
            metrics: vec!["listings".into()],
        }
    );
}

#[test]
fn test_request_shape_errors() {
    assert!(matches!(
        semantic_error(QueryRequest::new().metric("bookings").metric("bookings")),
        SemanticError::UnsupportedQuery(_)
    ));
    assert!(matches!(
        semantic_error(QueryRequest::new()),
        SemanticError::UnsupportedQuery(_)
    ));
    assert_eq!(
        semantic_error(
            QueryRequest::new()
                .metric("bookings")
                .group_by("listing__country")
                .order_by("listing__capacity")
        ),
        SemanticError::UnknownOrderBy("listing__capacity".into())
    );
    assert_eq!(
        semantic_error(QueryRequest::new().metric("revenue")),
        SemanticError::UnknownMetric("revenue".into())
    );
}
