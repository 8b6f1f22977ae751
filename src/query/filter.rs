//! Where filter templates.
//!
//! Filters are SQL with element references in Jinja-like calls:
//!
//! ```text
//! {{ Dimension('listing__country') }} = 'us'
//! {{ TimeDimension('metric_time', 'month') }} >= '2024-01-01'
//! {{ Entity('listing') }} IS NOT NULL
//! ```
//!
//! Each reference is resolved to a linkable element, and rendering replaces
//! it with that element's column.

use std::sync::OnceLock;

use regex::Regex;

use super::names::resolve_element_name;
use crate::semantic::{
    ElementPathKey, LinkableElementSet, LinkableElementType, SemanticError, SemanticResult, DUNDER,
};
use crate::sql::{Dialect, SqlDialect};

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\{\{\s*(Dimension|TimeDimension|Entity|Metric)\(\s*'([^']*)'(?:\s*,\s*'([^']*)')?\s*\)\s*\}\}",
        )
        .unwrap_or_else(|e| unreachable!("invalid filter reference pattern: {}", e))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Dimension,
    TimeDimension,
    Entity,
    Metric,
}

/// One element reference inside a filter template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterReference {
    placeholder: String,
    kind: ReferenceKind,
    element_name: String,
}

/// A filter template with its references parsed but not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereFilterSpec {
    template: String,
    references: Vec<FilterReference>,
}

impl WhereFilterSpec {
    pub fn parse(template: &str) -> Self {
        let references = reference_pattern()
            .captures_iter(template)
            .filter_map(|caps| {
                let placeholder = caps.get(0)?.as_str().to_string();
                let kind = match caps.get(1)?.as_str() {
                    "Dimension" => ReferenceKind::Dimension,
                    "TimeDimension" => ReferenceKind::TimeDimension,
                    "Entity" => ReferenceKind::Entity,
                    _ => ReferenceKind::Metric,
                };
                let mut element_name = caps.get(2)?.as_str().trim().to_string();
                if let Some(granularity) = caps.get(3) {
                    element_name.push_str(DUNDER);
                    element_name.push_str(granularity.as_str().trim());
                }
                Some(FilterReference {
                    placeholder,
                    kind,
                    element_name,
                })
            })
            .collect();
        Self {
            template: template.to_string(),
            references,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of the referenced elements, as written.
    pub fn element_names(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(|r| r.element_name.as_str())
    }

    /// Resolve every reference against `set`.
    pub fn resolve(&self, set: &LinkableElementSet) -> SemanticResult<ResolvedFilter> {
        let mut elements = Vec::with_capacity(self.references.len());
        for reference in &self.references {
            if reference.kind == ReferenceKind::Metric {
                return Err(SemanticError::UnsupportedQuery(format!(
                    "filtering by metric '{}' is not supported",
                    reference.element_name
                )));
            }
            let key = resolve_element_name(&reference.element_name, set)?.ok_or_else(|| {
                SemanticError::InvalidFilter {
                    name: reference.element_name.clone(),
                    message: "not a linkable element of the filtered metrics".to_string(),
                }
            })?;
            let kind_matches = match (reference.kind, key.element_type) {
                (ReferenceKind::Entity, LinkableElementType::Entity) => true,
                (
                    ReferenceKind::Dimension | ReferenceKind::TimeDimension,
                    LinkableElementType::Dimension | LinkableElementType::TimeDimension,
                ) => true,
                (ReferenceKind::Metric, _) => false,
                (ReferenceKind::Entity, _)
                | (ReferenceKind::Dimension | ReferenceKind::TimeDimension, _) => false,
            };
            if !kind_matches {
                return Err(SemanticError::InvalidFilter {
                    name: reference.element_name.clone(),
                    message: format!("resolves to {:?}, not {:?}", key.element_type, reference.kind),
                });
            }
            elements.push((reference.placeholder.clone(), key));
        }
        Ok(ResolvedFilter {
            template: self.template.clone(),
            elements,
        })
    }
}

/// A filter whose references point at path keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedFilter {
    pub template: String,
    elements: Vec<(String, ElementPathKey)>,
}

impl ResolvedFilter {
    /// Path keys the filter reads, without duplicates.
    pub fn path_keys(&self) -> Vec<&ElementPathKey> {
        let mut keys: Vec<&ElementPathKey> = Vec::new();
        for (_, key) in &self.elements {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// SQL with each reference replaced by its column name.
    pub fn render(&self, dialect: Dialect) -> String {
        let mut sql = self.template.clone();
        for (placeholder, key) in &self.elements {
            sql = sql.replace(placeholder, &dialect.quote_identifier(&key.qualified_name()));
        }
        sql
    }

    /// Column names the rendered SQL reads.
    pub fn column_names(&self) -> Vec<String> {
        self.path_keys().iter().map(|k| k.qualified_name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeGranularity;
    use crate::semantic::{LinkableDimension, LinkableEntity, SemanticModelJoinPath};
    use std::collections::BTreeSet;

    fn set() -> LinkableElementSet {
        let path = SemanticModelJoinPath::local("bookings_source");
        let mut set = LinkableElementSet::new();
        for key in [
            ElementPathKey::dimension("country", vec!["listing".into()]),
            ElementPathKey::time_dimension("metric_time", vec![], TimeGranularity::Month.into(), None),
        ] {
            set.add_dimension(LinkableDimension {
                path_key: key,
                semantic_model_origin: Some("bookings_source".into()),
                join_path: path.clone(),
                properties: BTreeSet::new(),
            });
        }
        set.add_entity(LinkableEntity {
            path_key: ElementPathKey::entity("listing", vec![]),
            semantic_model_origin: "bookings_source".into(),
            join_path: path,
            properties: BTreeSet::new(),
        });
        set
    }

    #[test]
    fn test_parse_and_render() {
        let spec = WhereFilterSpec::parse(
            "{{ Dimension('listing__country') }} = 'us' AND {{ TimeDimension('metric_time', 'month') }} >= '2024-01-01'",
        );
        assert_eq!(
            spec.element_names().collect::<Vec<_>>(),
            vec!["listing__country", "metric_time__month"]
        );
        let resolved = spec.resolve(&set()).unwrap();
        assert_eq!(
            resolved.render(Dialect::DuckDb),
            r#""listing__country" = 'us' AND "metric_time__month" >= '2024-01-01'"#
        );
        assert_eq!(resolved.column_names(), vec!["listing__country", "metric_time__month"]);
    }

    #[test]
    fn test_entity_reference() {
        let resolved = WhereFilterSpec::parse("{{ Entity('listing') }} IS NOT NULL")
            .resolve(&set())
            .unwrap();
        assert_eq!(resolved.render(Dialect::BigQuery), "`listing` IS NOT NULL");
    }

    #[test]
    fn test_unreachable_reference() {
        let err = WhereFilterSpec::parse("{{ Dimension('user__home_state') }} = 'CA'")
            .resolve(&set())
            .unwrap_err();
        assert!(matches!(err, SemanticError::InvalidFilter { name, .. } if name == "user__home_state"));
    }

    #[test]
    fn test_kind_mismatch_and_metric_reference() {
        let err = WhereFilterSpec::parse("{{ Entity('listing__country') }} = 1")
            .resolve(&set())
            .unwrap_err();
        assert!(matches!(err, SemanticError::InvalidFilter { .. }));

        let err = WhereFilterSpec::parse("{{ Metric('bookings') }} > 1")
            .resolve(&set())
            .unwrap_err();
        assert!(matches!(err, SemanticError::UnsupportedQuery(_)));
    }
}
