//! Lookup tables from element names to the semantic models defining them.

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{SemanticError, SemanticResult};
use crate::model::{
    Dimension, DimensionType, Manifest, Measure, Metric, SemanticModel, TimeGranularity,
};

/// Name-based index over an immutable manifest.
#[derive(Debug, Clone)]
pub struct SemanticModelIndex {
    manifest: Arc<Manifest>,
    model_by_name: HashMap<String, usize>,
    measure_to_model: HashMap<String, usize>,
    entity_to_models: HashMap<String, Vec<usize>>,
    dimension_to_models: HashMap<String, Vec<usize>>,
    metric_by_name: HashMap<String, usize>,
}

impl SemanticModelIndex {
    /// Build the index. Semantic model, measure and metric names must be
    /// globally unique.
    pub fn new(manifest: Arc<Manifest>) -> SemanticResult<Self> {
        let mut model_by_name = HashMap::new();
        let mut measure_to_model = HashMap::new();
        let mut entity_to_models: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dimension_to_models: HashMap<String, Vec<usize>> = HashMap::new();
        let mut metric_by_name = HashMap::new();

        for (idx, model) in manifest.semantic_models.iter().enumerate() {
            if model_by_name.insert(model.name.clone(), idx).is_some() {
                return Err(SemanticError::DuplicateName {
                    kind: "semantic model",
                    name: model.name.clone(),
                });
            }
            for measure in &model.measures {
                if measure_to_model.insert(measure.name.clone(), idx).is_some() {
                    return Err(SemanticError::DuplicateName {
                        kind: "measure",
                        name: measure.name.clone(),
                    });
                }
            }
            for entity in model.entity_names() {
                entity_to_models.entry(entity.to_string()).or_default().push(idx);
            }
            for dimension in &model.dimensions {
                dimension_to_models
                    .entry(dimension.name.clone())
                    .or_default()
                    .push(idx);
            }
        }

        for (idx, metric) in manifest.metrics.iter().enumerate() {
            if metric_by_name.insert(metric.name.clone(), idx).is_some() {
                return Err(SemanticError::DuplicateName {
                    kind: "metric",
                    name: metric.name.clone(),
                });
            }
        }

        Ok(Self {
            manifest,
            model_by_name,
            measure_to_model,
            entity_to_models,
            dimension_to_models,
            metric_by_name,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn semantic_models(&self) -> &[SemanticModel] {
        &self.manifest.semantic_models
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.manifest.metrics
    }

    pub fn get_semantic_model(&self, name: &str) -> SemanticResult<&SemanticModel> {
        self.model_by_name
            .get(name)
            .map(|idx| &self.manifest.semantic_models[*idx])
            .ok_or_else(|| SemanticError::UnknownSemanticModel(name.to_string()))
    }

    pub fn get_metric(&self, name: &str) -> SemanticResult<&Metric> {
        self.metric_by_name
            .get(name)
            .map(|idx| &self.manifest.metrics[*idx])
            .ok_or_else(|| SemanticError::UnknownMetric(name.to_string()))
    }

    /// The measure and the semantic model that owns it.
    pub fn get_measure(&self, name: &str) -> SemanticResult<(&SemanticModel, &Measure)> {
        let model = self
            .measure_to_model
            .get(name)
            .map(|idx| &self.manifest.semantic_models[*idx])
            .ok_or_else(|| SemanticError::UnknownMeasure(name.to_string()))?;
        let measure = model
            .get_measure(name)
            .ok_or_else(|| SemanticError::UnknownMeasure(name.to_string()))?;
        Ok((model, measure))
    }

    pub fn models_with_entity(&self, entity: &str) -> impl Iterator<Item = &SemanticModel> {
        self.models_at(self.entity_to_models.get(entity))
    }

    pub fn models_with_dimension(&self, dimension: &str) -> impl Iterator<Item = &SemanticModel> {
        self.models_at(self.dimension_to_models.get(dimension))
    }

    fn models_at<'a>(
        &'a self,
        indices: Option<&'a Vec<usize>>,
    ) -> impl Iterator<Item = &'a SemanticModel> + 'a {
        indices
            .into_iter()
            .flatten()
            .map(move |idx| &self.manifest.semantic_models[*idx])
    }

    /// Aggregation time dimension of a measure and its native granularity.
    pub fn agg_time_dimension(&self, measure_name: &str) -> SemanticResult<(&Dimension, TimeGranularity)> {
        let (model, measure) = self.get_measure(measure_name)?;
        let dim_name = model.agg_time_dimension_for(measure).ok_or_else(|| {
            SemanticError::MissingAggTimeDimension {
                measure: measure_name.to_string(),
            }
        })?;
        let invalid = || SemanticError::InvalidAggTimeDimension {
            measure: measure_name.to_string(),
            dimension: dim_name.to_string(),
            semantic_model: model.name.clone(),
        };
        let dimension = model.get_dimension(dim_name).ok_or_else(invalid)?;
        match dimension.dimension_type {
            DimensionType::Time => {
                let granularity = dimension.time_granularity().ok_or_else(invalid)?;
                Ok((dimension, granularity))
            }
            DimensionType::Categorical => Err(invalid()),
        }
    }
}
