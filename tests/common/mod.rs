//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use meridian::config::Settings;
use meridian::engine::QueryEngine;
use meridian::model::{load_manifest_file, Manifest, Metric};
use meridian::sql::{check_statements, Dialect};

pub const ALL_DIALECTS: [Dialect; 6] = Dialect::ALL;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn bookings_manifest() -> Manifest {
    load_manifest_file(&fixture_path("bookings_manifest.json")).unwrap()
}

/// Route planner logs to the test harness. Set `RUST_LOG=meridian=debug`
/// to see them.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn engine() -> QueryEngine {
    engine_with(Settings::default())
}

pub fn engine_with(settings: Settings) -> QueryEngine {
    init_tracing();
    QueryEngine::new(bookings_manifest(), settings).unwrap()
}

/// Engine over the bookings manifest plus extra metrics given as JSON.
pub fn engine_with_metrics(metrics: Vec<serde_json::Value>) -> QueryEngine {
    init_tracing();
    let mut manifest = bookings_manifest();
    for value in metrics {
        let metric: Metric = serde_json::from_value(value).unwrap();
        manifest.metrics.push(metric);
    }
    QueryEngine::new(manifest, Settings::default()).unwrap()
}

/// Panics unless `sql` parses in the given dialect.
pub fn assert_valid_sql(sql: &str, dialect: Dialect) {
    if let Err(e) = check_statements(sql, dialect) {
        panic!("{}\n{}", e, sql);
    }
}
