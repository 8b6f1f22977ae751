//! Join validity between semantic models.
//!
//! Joins always go from the model holding the measure (left) to the model
//! providing the linkable element (right), as a LEFT OUTER JOIN. A join is
//! only valid when the right side has at most one row per entity value, so
//! measures are never fanned out.

use serde::Serialize;

use crate::model::{EntityType, SemanticModel};

/// Relationship cardinality between the two sides of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
}

impl Cardinality {
    fn from_uniqueness(left_unique: bool) -> Self {
        if left_unique {
            Cardinality::OneToOne
        } else {
            Cardinality::ManyToOne
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticModelJoinType {
    LeftOuter,
}

/// An accepted join between two models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescription {
    pub join_type: SemanticModelJoinType,
    pub cardinality: Cardinality,
    pub left_entity_type: EntityType,
    pub right_entity_type: EntityType,
}

/// Decides whether two semantic models can be joined on an entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinPathEvaluator;

impl JoinPathEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether `left` can be joined to `right` on `entity` without fan-out.
    pub fn is_valid_join(&self, left: &SemanticModel, right: &SemanticModel, entity: &str) -> bool {
        self.describe_join(left, right, entity).is_some()
    }

    /// The join that would be used, or `None` when the join is invalid.
    pub fn describe_join(
        &self,
        left: &SemanticModel,
        right: &SemanticModel,
        entity: &str,
    ) -> Option<JoinDescription> {
        if left.name == right.name {
            return None;
        }
        let left_type = left.entity_type(entity)?;
        let right_type = right.entity_type(entity)?;

        let valid = match (left_type, right_type) {
            (_, EntityType::Primary | EntityType::Unique) => true,
            (EntityType::Natural, EntityType::Natural) => true,
            (EntityType::Primary | EntityType::Unique | EntityType::Foreign, EntityType::Natural) => {
                false
            }
            (_, EntityType::Foreign) => false,
        };
        if !valid {
            return None;
        }

        let left_unique = matches!(left_type, EntityType::Primary | EntityType::Unique);
        Some(JoinDescription {
            join_type: SemanticModelJoinType::LeftOuter,
            cardinality: Cardinality::from_uniqueness(left_unique),
            left_entity_type: left_type,
            right_entity_type: right_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, NodeRelation};

    fn model(name: &str, entities: &[(&str, EntityType)]) -> SemanticModel {
        SemanticModel {
            name: name.into(),
            node_relation: NodeRelation {
                alias: name.into(),
                schema_name: "main".into(),
                database: None,
            },
            defaults: None,
            primary_entity: None,
            entities: entities
                .iter()
                .map(|(n, t)| Entity {
                    name: (*n).into(),
                    entity_type: *t,
                    expr: None,
                })
                .collect(),
            measures: vec![],
            dimensions: vec![],
        }
    }

    #[test]
    fn test_foreign_to_primary_is_valid() {
        let bookings = model("bookings", &[("listing", EntityType::Foreign)]);
        let listings = model("listings", &[("listing", EntityType::Primary)]);
        let evaluator = JoinPathEvaluator::new();
        let join = evaluator.describe_join(&bookings, &listings, "listing").unwrap();
        assert_eq!(join.join_type, SemanticModelJoinType::LeftOuter);
        assert_eq!(join.cardinality, Cardinality::ManyToOne);
    }

    #[test]
    fn test_primary_to_unique_is_one_to_one() {
        let users = model("users", &[("user", EntityType::Primary)]);
        let profiles = model("profiles", &[("user", EntityType::Unique)]);
        let join = JoinPathEvaluator::new()
            .describe_join(&users, &profiles, "user")
            .unwrap();
        assert_eq!(join.cardinality, Cardinality::OneToOne);
    }

    #[test]
    fn test_fan_out_joins_are_rejected() {
        let evaluator = JoinPathEvaluator::new();
        let a = model("a", &[("user", EntityType::Foreign)]);
        let b = model("b", &[("user", EntityType::Foreign)]);
        let c = model("c", &[("user", EntityType::Primary)]);
        assert!(!evaluator.is_valid_join(&a, &b, "user"));
        assert!(!evaluator.is_valid_join(&c, &a, "user"));
    }

    #[test]
    fn test_natural_joins() {
        let evaluator = JoinPathEvaluator::new();
        let scd = model("scd", &[("listing", EntityType::Natural)]);
        let other = model("other", &[("listing", EntityType::Natural)]);
        let primary = model("primary", &[("listing", EntityType::Primary)]);
        assert!(evaluator.is_valid_join(&scd, &other, "listing"));
        assert!(evaluator.is_valid_join(&scd, &primary, "listing"));
        assert!(!evaluator.is_valid_join(&primary, &scd, "listing"));
    }

    #[test]
    fn test_missing_entity_or_same_model() {
        let evaluator = JoinPathEvaluator::new();
        let a = model("a", &[("user", EntityType::Primary)]);
        let b = model("b", &[("listing", EntityType::Primary)]);
        assert!(!evaluator.is_valid_join(&a, &b, "user"));
        assert!(!evaluator.is_valid_join(&a, &a, "user"));
    }
}
