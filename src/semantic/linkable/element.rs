//! Linkable elements: what a metric query can group by, and how to reach it.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::{DatePart, ExpandedTimeGranularity};
use crate::semantic::join_path::SemanticModelJoinPath;

/// Separator between entity links, element names and granularity suffixes.
pub const DUNDER: &str = "__";

/// Name of the synthetic time dimension shared by all measures.
pub const METRIC_TIME: &str = "metric_time";

/// Provenance tags on a linkable element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkableElementProperty {
    /// Defined on the measure's own semantic model.
    Local,
    /// Reached through at least one join.
    Joined,
    /// Reached through more than one join.
    MultiHop,
    MetricTime,
    /// A granularity or date part other than the dimension's native one.
    DerivedTimeGranularity,
    Entity,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkableElementType {
    Dimension,
    TimeDimension,
    Entity,
    Metric,
}

/// Identity of a linkable element: name, entity links and, for time
/// dimensions, the granularity or date part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementPathKey {
    pub element_name: String,
    pub element_type: LinkableElementType,
    pub entity_links: Vec<String>,
    pub time_granularity: Option<ExpandedTimeGranularity>,
    pub date_part: Option<DatePart>,
}

impl ElementPathKey {
    pub fn dimension(element_name: impl Into<String>, entity_links: Vec<String>) -> Self {
        Self {
            element_name: element_name.into(),
            element_type: LinkableElementType::Dimension,
            entity_links,
            time_granularity: None,
            date_part: None,
        }
    }

    pub fn time_dimension(
        element_name: impl Into<String>,
        entity_links: Vec<String>,
        time_granularity: ExpandedTimeGranularity,
        date_part: Option<DatePart>,
    ) -> Self {
        Self {
            element_name: element_name.into(),
            element_type: LinkableElementType::TimeDimension,
            entity_links,
            time_granularity: Some(time_granularity),
            date_part,
        }
    }

    pub fn entity(element_name: impl Into<String>, entity_links: Vec<String>) -> Self {
        Self {
            element_name: element_name.into(),
            element_type: LinkableElementType::Entity,
            entity_links,
            time_granularity: None,
            date_part: None,
        }
    }

    pub fn metric(element_name: impl Into<String>, entity_links: Vec<String>) -> Self {
        Self {
            element_name: element_name.into(),
            element_type: LinkableElementType::Metric,
            entity_links,
            time_granularity: None,
            date_part: None,
        }
    }

    pub fn is_metric_time(&self) -> bool {
        self.element_name == METRIC_TIME && self.entity_links.is_empty()
    }

    /// Fully qualified name, e.g. `listing__country`,
    /// `booking__ds__month`, `metric_time__extract_year`.
    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self.entity_links.iter().map(String::as_str).collect();
        parts.push(&self.element_name);
        let mut name = parts.join(DUNDER);
        match (&self.date_part, &self.time_granularity) {
            (Some(part), _) => {
                name.push_str(DUNDER);
                name.push_str("extract_");
                name.push_str(part.name());
            }
            (None, Some(granularity)) => {
                name.push_str(DUNDER);
                name.push_str(&granularity.name);
            }
            (None, None) => {}
        }
        name
    }
}

impl fmt::Display for ElementPathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A dimension (categorical or time) reachable from a measure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkableDimension {
    pub path_key: ElementPathKey,
    /// Model that defines the dimension. `None` for `metric_time`.
    pub semantic_model_origin: Option<String>,
    pub join_path: SemanticModelJoinPath,
    pub properties: BTreeSet<LinkableElementProperty>,
}

/// An entity reachable from a measure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkableEntity {
    pub path_key: ElementPathKey,
    pub semantic_model_origin: String,
    pub join_path: SemanticModelJoinPath,
    pub properties: BTreeSet<LinkableElementProperty>,
}

/// A metric that can be grouped by through a correlated entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkableMetric {
    pub path_key: ElementPathKey,
    /// Entity the metric subquery is grouped by and joined on.
    pub join_by_entity: String,
    pub semantic_model_origin: String,
    pub join_path: SemanticModelJoinPath,
    pub properties: BTreeSet<LinkableElementProperty>,
}

/// Properties for an element reached through `join_path`.
pub(crate) fn path_properties(
    join_path: &SemanticModelJoinPath,
    extra: &[LinkableElementProperty],
) -> BTreeSet<LinkableElementProperty> {
    let mut properties: BTreeSet<_> = extra.iter().copied().collect();
    if join_path.is_empty() {
        properties.insert(LinkableElementProperty::Local);
    } else {
        properties.insert(LinkableElementProperty::Joined);
    }
    if join_path.len() > 1 {
        properties.insert(LinkableElementProperty::MultiHop);
    }
    properties
}
