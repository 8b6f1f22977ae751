//! Manifest loading.
//!
//! Manifests are JSON documents. After parsing, simple metrics that declare
//! their aggregation inline are normalized into a measure of the referenced
//! semantic model so that every later stage only sees measure-backed
//! simple metrics.
//!
//! [`normalize_conversion_inputs`] runs after validation: a conversion metric
//! that pairs a measure with a metric gets the measure slot rewritten to a
//! simple metric over that measure.

use std::fs;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::metric::{
    MeasureOrMetric, Metric, MetricInput, MetricInputMeasure, MetricType, MetricTypeParams,
};
use super::semantic_model::Measure;
use super::Manifest;

/// Errors that can occur when loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metric '{metric}' aggregates over unknown semantic model '{semantic_model}'")]
    UnknownSemanticModel {
        metric: String,
        semantic_model: String,
    },

    #[error("Metric '{metric}' declares an inline aggregation but semantic model '{semantic_model}' already has a measure with that name")]
    MeasureNameCollision {
        metric: String,
        semantic_model: String,
    },
}

/// Result type for manifest loading.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Load a manifest from a JSON file.
pub fn load_manifest_file(path: &Path) -> ManifestResult<Manifest> {
    if !path.exists() {
        return Err(ManifestError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path)?;
    load_manifest_str(&content)
}

/// Load a manifest from JSON text.
pub fn load_manifest_str(content: &str) -> ManifestResult<Manifest> {
    let mut manifest: Manifest = serde_json::from_str(content)?;
    normalize_inline_aggregations(&mut manifest)?;
    Ok(manifest)
}

fn normalize_inline_aggregations(manifest: &mut Manifest) -> ManifestResult<()> {
    for metric in &mut manifest.metrics {
        if metric.metric_type != MetricType::Simple || metric.type_params.measure.is_some() {
            continue;
        }
        let Some(params) = metric.type_params.metric_aggregation_params.take() else {
            continue;
        };

        let model = manifest
            .semantic_models
            .iter_mut()
            .find(|m| m.name == params.semantic_model)
            .ok_or_else(|| ManifestError::UnknownSemanticModel {
                metric: metric.name.clone(),
                semantic_model: params.semantic_model.clone(),
            })?;
        if model.get_measure(&metric.name).is_some() {
            return Err(ManifestError::MeasureNameCollision {
                metric: metric.name.clone(),
                semantic_model: model.name.clone(),
            });
        }

        model.measures.push(Measure {
            name: metric.name.clone(),
            agg: params.agg,
            expr: params.expr,
            agg_time_dimension: params.agg_time_dimension,
            agg_params: params.agg_params,
            non_additive_dimension: params.non_additive_dimension,
        });
        metric.type_params.measure = Some(MetricInputMeasure::named(metric.name.clone()));
    }
    Ok(())
}

/// Rewrite the measure slot of every conversion metric whose other slot is
/// a metric into a reference to a simple metric over that measure. An
/// existing unfiltered simple metric over the same measure input is reused;
/// otherwise one is added to the manifest. Returns the names of the added
/// metrics.
pub fn normalize_conversion_inputs(manifest: &mut Manifest) -> Vec<String> {
    let mut added = Vec::new();
    for idx in 0..manifest.metrics.len() {
        let metric = &manifest.metrics[idx];
        if metric.metric_type != MetricType::Conversion {
            continue;
        }
        let slots = (metric.conversion_base_input(), metric.conversion_input());
        let (base_slot, conversion_slot) = match slots {
            (Some(MeasureOrMetric::Measure(measure)), Some(MeasureOrMetric::Metric(_))) => {
                (Some(measure.clone()), None)
            }
            (Some(MeasureOrMetric::Metric(_)), Some(MeasureOrMetric::Measure(measure))) => {
                (None, Some(measure.clone()))
            }
            _ => continue,
        };
        let owner = metric.name.clone();

        let base_metric = base_slot.map(|measure| simple_metric_for(manifest, &owner, measure, &mut added));
        let conversion_metric =
            conversion_slot.map(|measure| simple_metric_for(manifest, &owner, measure, &mut added));

        let Some(params) = manifest.metrics[idx].type_params.conversion_type_params.as_mut() else {
            continue;
        };
        if let Some(name) = base_metric {
            params.base_measure = None;
            params.base_metric = Some(MetricInput::named(name));
        }
        if let Some(name) = conversion_metric {
            params.conversion_measure = None;
            params.conversion_metric = Some(MetricInput::named(name));
        }
    }
    added
}

/// Name of a simple metric computing `measure`, adding one when needed.
fn simple_metric_for(
    manifest: &mut Manifest,
    owner: &str,
    measure: MetricInputMeasure,
    added: &mut Vec<String>,
) -> String {
    let existing = manifest.metrics.iter().find(|m| {
        m.metric_type == MetricType::Simple
            && m.filter.is_none()
            && m.type_params.measure.as_ref() == Some(&measure)
    });
    if let Some(existing) = existing {
        return existing.name.clone();
    }

    let taken = |name: &str| manifest.metrics.iter().any(|m| m.name == name);
    let mut name = measure.name.clone();
    if taken(&name) {
        name = format!("{}__{}", owner, measure.name);
    }
    let mut suffix = 1;
    while taken(&name) {
        name = format!("{}__{}_{}", owner, measure.name, suffix);
        suffix += 1;
    }

    manifest.metrics.push(Metric {
        name: name.clone(),
        metric_type: MetricType::Simple,
        type_params: MetricTypeParams {
            measure: Some(measure),
            ..MetricTypeParams::default()
        },
        filter: None,
        description: Some(format!("measure input of conversion metric '{}'", owner)),
    });
    added.push(name.clone());
    name
}

/// SHA-256 of the canonical JSON serialization of a value, as lowercase hex.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl Manifest {
    /// Content fingerprint identifying this manifest.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        compute_hash(self)
    }
}
