#[path = "../common/mod.rs"]
mod common;

use meridian::config::Settings;
use meridian::engine::{EngineError, QueryEngine};
use meridian::model::{Manifest, Metric, MetricTimeWindow, TimeGranularity};
use meridian::validation::{validate_manifest, ValidationElement, ValidationIssueLevel};
use serde_json::json;

fn metric(value: serde_json::Value) -> Metric {
    serde_json::from_value(value).unwrap()
}

fn error_messages(manifest: &Manifest) -> Vec<String> {
    validate_manifest(manifest)
        .errors()
        .map(|issue| issue.message.clone())
        .collect()
}

#[test]
fn test_fixture_is_valid() {
    let results = validate_manifest(&common::bookings_manifest());
    assert!(results.is_empty(), "{}", results);
}

#[test]
fn test_cumulative_window_conflict() {
    let mut manifest = common::bookings_manifest();
    let trailing = manifest
        .metrics
        .iter_mut()
        .find(|m| m.name == "trailing_7d_bookings")
        .unwrap();
    trailing.type_params.window = Some(MetricTimeWindow::new(14, TimeGranularity::Day));

    let results = validate_manifest(&manifest);
    let errors: Vec<_> = results.errors().collect();
    assert_eq!(errors.len(), 1, "{}", results);
    assert_eq!(
        errors[0].context.element,
        ValidationElement::Metric("trailing_7d_bookings".into())
    );
    assert!(errors[0].message.contains("14 days"));
    assert!(errors[0].message.contains("7 days"));
}

#[test]
fn test_grain_to_date_conflict_and_window_with_grain() {
    let mut manifest = common::bookings_manifest();
    manifest.metrics.push(metric(json!({
        "name": "bookings_qtd",
        "type": "cumulative",
        "type_params": {
            "measure": {"name": "bookings"},
            "grain_to_date": "quarter",
            "cumulative_type_params": {"grain_to_date": "month", "window": "7 days"}
        }
    })));

    let errors = error_messages(&manifest);
    assert!(errors
        .iter()
        .any(|m| m.contains("'quarter'") && m.contains("'month'")));
    assert!(errors
        .iter()
        .any(|m| m == "cumulative metric cannot set both a window and grain_to_date"));
}

#[test]
fn test_input_slot_rules() {
    let mut manifest = common::bookings_manifest();
    manifest.metrics.push(metric(json!({
        "name": "empty_cumulative",
        "type": "cumulative",
        "type_params": {"cumulative_type_params": {"window": "7 days"}}
    })));
    manifest.metrics.push(metric(json!({
        "name": "both_inputs",
        "type": "conversion",
        "type_params": {"conversion_type_params": {
            "base_measure": {"name": "visits"},
            "base_metric": {"name": "visits"},
            "conversion_measure": {"name": "buys"},
            "entity": "user"
        }}
    })));

    let results = validate_manifest(&manifest);
    let errors: Vec<_> = results.errors().collect();
    assert_eq!(errors.len(), 1, "{}", results);
    assert_eq!(errors[0].message, "input slot needs a measure or a metric");

    let warnings: Vec<_> = results.warnings().collect();
    assert_eq!(warnings.len(), 1, "{}", results);
    assert_eq!(warnings[0].level, ValidationIssueLevel::Warning);
    assert!(warnings[0].message.starts_with("base slot sets both"));
}

#[test]
fn test_semantic_model_rules() {
    let mut manifest = common::bookings_manifest();
    let accounts = manifest
        .semantic_models
        .iter_mut()
        .find(|m| m.name == "accounts_source")
        .unwrap();
    let measure = &mut accounts.measures[0];
    if let Some(nad) = measure.non_additive_dimension.as_mut() {
        nad.name = "account_type".into();
        nad.window_groupings.push("listing".into());
    }

    let errors = error_messages(&manifest);
    assert!(errors.iter().any(|m| m.contains("'account_type'") && m.contains("not a time dimension")));
    assert!(errors.iter().any(|m| m.contains("window grouping 'listing'")));
}

#[test]
fn test_conversion_entity_must_exist_on_both_models() {
    let mut manifest = common::bookings_manifest();
    manifest.metrics.push(metric(json!({
        "name": "visit_booking_conversion",
        "type": "conversion",
        "type_params": {"conversion_type_params": {
            "base_measure": {"name": "visits"},
            "conversion_measure": {"name": "bookings"},
            "entity": "user"
        }}
    })));

    let errors = error_messages(&manifest);
    assert_eq!(
        errors,
        vec!["entity 'user' is not defined on semantic model 'bookings_source' of measure 'bookings'"]
    );
}

#[test]
fn test_time_spine_required_for_offsets() {
    let mut manifest = common::bookings_manifest();
    manifest.project_configuration.time_spines.clear();
    let errors = error_messages(&manifest);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("need a time spine"));
}

#[test]
fn test_engine_refuses_invalid_manifest() {
    let mut manifest = common::bookings_manifest();
    manifest.metrics.push(metric(json!({
        "name": "ghost_ratio",
        "type": "ratio",
        "type_params": {"numerator": {"name": "bookings"}, "denominator": {"name": "ghosts"}}
    })));

    match QueryEngine::new(manifest, Settings::default()) {
        Err(EngineError::InvalidManifest(results)) => {
            let text = results.to_string();
            assert!(
                text.contains("[ERROR] metric 'ghost_ratio': input metric 'ghosts' is not defined"),
                "{}",
                text
            );
        }
        other => panic!("expected InvalidManifest, got {:?}", other.map(|_| ())),
    }
}
