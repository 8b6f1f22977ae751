//! Semantic manifest types.
//!
//! The manifest is loaded once (see [`loader`]) and is read-only for the
//! lifetime of an engine. Everything downstream borrows from it.

pub mod loader;
pub mod metric;
pub mod semantic_model;
pub mod time;

pub use loader::{
    load_manifest_file, load_manifest_str, normalize_conversion_inputs, ManifestError,
};
pub use metric::{
    ConversionCalculationType, ConversionTypeParams, CumulativeTypeParams, MeasureOrMetric,
    Metric, MetricInput, MetricInputMeasure, MetricTimeWindow, MetricType, MetricTypeParams,
    PeriodAggregation, WhereFilter, WhereFilterIntersection,
};
pub use semantic_model::{
    AggregationType, Dimension, DimensionType, Entity, EntityType, Measure, NodeRelation,
    NonAdditiveDimension, SemanticModel, WindowChoice,
};
pub use time::{DatePart, ExpandedTimeGranularity, TimeGranularity};

use serde::{Deserialize, Serialize};

/// Root of the semantic manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub semantic_models: Vec<SemanticModel>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub project_configuration: ProjectConfiguration,
}

impl Manifest {
    pub fn get_metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn get_semantic_model(&self, name: &str) -> Option<&SemanticModel> {
        self.semantic_models.iter().find(|m| m.name == name)
    }

    /// Every custom granularity declared on any time spine.
    pub fn custom_granularities(&self) -> Vec<ExpandedTimeGranularity> {
        self.project_configuration
            .time_spines
            .iter()
            .flat_map(|spine| {
                spine.custom_granularities.iter().map(move |c| {
                    ExpandedTimeGranularity::custom(
                        c.name.clone(),
                        spine.primary_column.time_granularity,
                    )
                })
            })
            .collect()
    }

    /// Coarsest time spine whose grain is at least as fine as `granularity`.
    pub fn time_spine_for(&self, granularity: TimeGranularity) -> Option<&TimeSpine> {
        self.project_configuration
            .time_spines
            .iter()
            .filter(|s| s.primary_column.time_granularity <= granularity)
            .max_by_key(|s| s.primary_column.time_granularity)
    }

    /// The time spine declaring a custom granularity, with the column it is
    /// stored in.
    pub fn time_spine_for_custom(&self, name: &str) -> Option<(&TimeSpine, &str)> {
        self.project_configuration
            .time_spines
            .iter()
            .find_map(|spine| {
                spine
                    .custom_granularities
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| (spine, c.column_name()))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfiguration {
    #[serde(default)]
    pub time_spines: Vec<TimeSpine>,
}

/// A table with one row per period, used for cumulative windows, time
/// offsets and custom granularities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpine {
    pub node_relation: NodeRelation,
    pub primary_column: TimeSpinePrimaryColumn,
    #[serde(default)]
    pub custom_granularities: Vec<CustomGranularity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpinePrimaryColumn {
    pub name: String,
    pub time_granularity: TimeGranularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomGranularity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
}

impl CustomGranularity {
    pub fn column_name(&self) -> &str {
        self.column_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spine(alias: &str, granularity: TimeGranularity) -> TimeSpine {
        TimeSpine {
            node_relation: NodeRelation {
                alias: alias.into(),
                schema_name: "main".into(),
                database: None,
            },
            primary_column: TimeSpinePrimaryColumn {
                name: "ds".into(),
                time_granularity: granularity,
            },
            custom_granularities: vec![CustomGranularity {
                name: "fiscal_quarter".into(),
                column_name: Some("fiscal_qtr".into()),
            }],
        }
    }

    #[test]
    fn test_time_spine_selection() {
        let manifest = Manifest {
            project_configuration: ProjectConfiguration {
                time_spines: vec![
                    spine("spine_hour", TimeGranularity::Hour),
                    spine("spine_day", TimeGranularity::Day),
                ],
            },
            ..Default::default()
        };
        let month = manifest.time_spine_for(TimeGranularity::Month).unwrap();
        assert_eq!(month.node_relation.alias, "spine_day");
        let hour = manifest.time_spine_for(TimeGranularity::Hour).unwrap();
        assert_eq!(hour.node_relation.alias, "spine_hour");
        assert!(manifest.time_spine_for(TimeGranularity::Minute).is_none());
    }

    #[test]
    fn test_custom_granularity_lookup() {
        let manifest = Manifest {
            project_configuration: ProjectConfiguration {
                time_spines: vec![spine("spine_day", TimeGranularity::Day)],
            },
            ..Default::default()
        };
        let (spine, column) = manifest.time_spine_for_custom("fiscal_quarter").unwrap();
        assert_eq!(spine.node_relation.alias, "spine_day");
        assert_eq!(column, "fiscal_qtr");
        assert_eq!(
            manifest.custom_granularities(),
            vec![ExpandedTimeGranularity::custom("fiscal_quarter", TimeGranularity::Day)]
        );
    }
}
