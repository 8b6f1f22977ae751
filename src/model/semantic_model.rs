//! Semantic models: table-backed sources of entities, measures and dimensions.

use serde::{Deserialize, Serialize};

use super::time::TimeGranularity;

/// A named table-backed source of measures, dimensions and entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticModel {
    pub name: String,
    pub node_relation: NodeRelation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<SemanticModelDefaults>,
    /// Entity implied by every row when the model has no PRIMARY entity
    /// column of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_entity: Option<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl SemanticModel {
    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn get_measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn get_dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Entity type of `name` in this model. The declared primary entity
    /// counts as PRIMARY.
    pub fn entity_type(&self, name: &str) -> Option<EntityType> {
        self.get_entity(name).map(|e| e.entity_type).or_else(|| {
            (self.primary_entity.as_deref() == Some(name)).then_some(EntityType::Primary)
        })
    }

    /// Names of all entities, including a declared primary entity that has
    /// no column of its own.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.iter().map(|e| e.name.as_str()).collect();
        if let Some(primary) = self.primary_entity.as_deref() {
            if !names.contains(&primary) {
                names.push(primary);
            }
        }
        names
    }

    /// Aggregation time dimension of a measure: its own, else the model default.
    pub fn agg_time_dimension_for<'a>(&'a self, measure: &'a Measure) -> Option<&'a str> {
        measure.agg_time_dimension.as_deref().or_else(|| {
            self.defaults
                .as_ref()
                .and_then(|d| d.agg_time_dimension.as_deref())
        })
    }
}

/// Physical location of the table behind a semantic model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRelation {
    pub alias: String,
    pub schema_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl NodeRelation {
    /// `database.schema.alias`, omitting the database when unset.
    pub fn relation_name(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}.{}", db, self.schema_name, self.alias),
            None => format!("{}.{}", self.schema_name, self.alias),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticModelDefaults {
    #[serde(default)]
    pub agg_time_dimension: Option<String>,
}

// =============================================================================
// Entities
// =============================================================================

/// Cardinality role of an entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Primary,
    Unique,
    Foreign,
    Natural,
}

impl EntityType {
    /// At most one row per entity value.
    pub fn is_unique(&self) -> bool {
        match self {
            EntityType::Primary | EntityType::Unique | EntityType::Natural => true,
            EntityType::Foreign => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl Entity {
    pub fn column_expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }
}

// =============================================================================
// Measures
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Sum,
    SumBoolean,
    Count,
    CountDistinct,
    Min,
    Max,
    Average,
    Percentile,
    Median,
}

impl AggregationType {
    /// Whether partial aggregates can be re-aggregated with the same function.
    pub fn is_additive(&self) -> bool {
        match self {
            AggregationType::Sum | AggregationType::SumBoolean | AggregationType::Count => true,
            AggregationType::CountDistinct
            | AggregationType::Min
            | AggregationType::Max
            | AggregationType::Average
            | AggregationType::Percentile
            | AggregationType::Median => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasureAggregationParameters {
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub use_discrete_percentile: bool,
    #[serde(default)]
    pub use_approximate_percentile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowChoice {
    Min,
    Max,
}

/// A dimension over which a measure must not be summed: only the rows at
/// the MIN or MAX value of the dimension (per window grouping) count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonAdditiveDimension {
    pub name: String,
    pub window_choice: WindowChoice,
    #[serde(default)]
    pub window_groupings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    pub agg: AggregationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_time_dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_params: Option<MeasureAggregationParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_additive_dimension: Option<NonAdditiveDimension>,
}

impl Measure {
    pub fn column_expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }
}

// =============================================================================
// Dimensions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    Categorical,
    Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionTypeParams {
    pub time_granularity: TimeGranularity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_params: Option<DimensionTypeParams>,
}

impl Dimension {
    pub fn column_expr(&self) -> &str {
        self.expr.as_deref().unwrap_or(&self.name)
    }

    /// Native granularity of a TIME dimension. Time dimensions without
    /// type params default to DAY.
    pub fn time_granularity(&self) -> Option<TimeGranularity> {
        match self.dimension_type {
            DimensionType::Time => Some(
                self.type_params
                    .as_ref()
                    .map(|p| p.time_granularity)
                    .unwrap_or(TimeGranularity::Day),
            ),
            DimensionType::Categorical => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listings() -> SemanticModel {
        serde_json::from_value(serde_json::json!({
            "name": "listings_latest",
            "node_relation": {"alias": "dim_listings", "schema_name": "main"},
            "defaults": {"agg_time_dimension": "created_at"},
            "entities": [
                {"name": "listing", "type": "primary", "expr": "listing_id"},
                {"name": "user", "type": "foreign", "expr": "user_id"}
            ],
            "measures": [{"name": "listings", "agg": "sum", "expr": "1"}],
            "dimensions": [
                {"name": "created_at", "type": "time", "type_params": {"time_granularity": "day"}},
                {"name": "country", "type": "categorical"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_semantic_model() {
        let model = listings();
        assert_eq!(model.entity_type("listing"), Some(EntityType::Primary));
        assert_eq!(model.entity_type("user"), Some(EntityType::Foreign));
        assert_eq!(model.get_entity("listing").unwrap().column_expr(), "listing_id");
        assert_eq!(model.node_relation.relation_name(), "main.dim_listings");
    }

    #[test]
    fn test_agg_time_dimension_falls_back_to_default() {
        let model = listings();
        let measure = model.get_measure("listings").unwrap();
        assert_eq!(model.agg_time_dimension_for(measure), Some("created_at"));
    }

    #[test]
    fn test_measure_agg_time_dimension_wins() {
        let model = listings();
        let mut measure = model.get_measure("listings").unwrap().clone();
        measure.agg_time_dimension = Some("ds".into());
        assert_eq!(model.agg_time_dimension_for(&measure), Some("ds"));
    }

    #[test]
    fn test_primary_entity_counts_as_primary() {
        let mut model = listings();
        model.primary_entity = Some("listing_snapshot".into());
        assert_eq!(model.entity_type("listing_snapshot"), Some(EntityType::Primary));
        assert!(model.entity_names().contains(&"listing_snapshot"));
    }

    #[test]
    fn test_time_granularity_only_for_time_dimensions() {
        let model = listings();
        assert_eq!(
            model.get_dimension("created_at").unwrap().time_granularity(),
            Some(TimeGranularity::Day)
        );
        assert_eq!(model.get_dimension("country").unwrap().time_granularity(), None);
    }
}
