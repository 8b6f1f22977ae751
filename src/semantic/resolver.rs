//! Linkable element resolution.
//!
//! For a measure, enumerates every dimension, entity and metric that can be
//! grouped by, with the join path needed to reach it:
//!
//! ```text
//! bookings_source ──listing──► listings_latest ──user──► users_ds_source
//!   booking__is_instant          listing__country          listing__user__home_state
//!   metric_time__month           listing__created_at__day  ...
//! ```
//!
//! Join paths are discovered breadth-first up to `max_entity_links` hops.
//! A path never revisits a model or reuses an entity.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::error::{SemanticError, SemanticResult};
use super::index::SemanticModelIndex;
use super::join::JoinPathEvaluator;
use super::join_path::SemanticModelJoinPath;
use super::linkable::element::path_properties;
use super::linkable::{
    ElementPathKey, LinkableDimension, LinkableElementFilter, LinkableElementProperty,
    LinkableElementSet, LinkableEntity, LinkableMetric, METRIC_TIME,
};
use super::metric_lookup::{measures_for_metric, MeasureScope};
use crate::model::{
    DatePart, DimensionType, EntityType, ExpandedTimeGranularity, MeasureOrMetric, MetricType,
    SemanticModel, TimeGranularity,
};

/// Granularity used for `metric_time` when no measure fixes one.
pub const DEFAULT_METRIC_TIME_GRANULARITY: TimeGranularity = TimeGranularity::Day;

pub struct LinkableElementResolver<'a> {
    index: &'a SemanticModelIndex,
    join_evaluator: JoinPathEvaluator,
    max_entity_links: usize,
    custom_granularities: Vec<ExpandedTimeGranularity>,
    /// Entities every metric can be grouped by: those shared by all models
    /// the metric's groupable measures come from.
    groupable_entities: BTreeMap<String, BTreeSet<String>>,
}

impl<'a> LinkableElementResolver<'a> {
    pub fn new(index: &'a SemanticModelIndex, max_entity_links: usize) -> SemanticResult<Self> {
        let mut groupable_entities = BTreeMap::new();
        for metric in index.metrics() {
            let mut shared: Option<BTreeSet<String>> = None;
            for measure in measures_for_metric(index, &metric.name, MeasureScope::GroupableOnly)? {
                let (model, _) = index.get_measure(&measure)?;
                let entities: BTreeSet<String> =
                    model.entity_names().into_iter().map(str::to_string).collect();
                shared = Some(match shared {
                    Some(acc) => acc.intersection(&entities).cloned().collect(),
                    None => entities,
                });
            }
            groupable_entities.insert(metric.name.clone(), shared.unwrap_or_default());
        }

        Ok(Self {
            index,
            join_evaluator: JoinPathEvaluator::new(),
            max_entity_links,
            custom_granularities: index.manifest().custom_granularities(),
            groupable_entities,
        })
    }

    pub fn max_entity_links(&self) -> usize {
        self.max_entity_links
    }

    /// Every join path starting at `model`, shortest first, excluding the
    /// empty path.
    pub fn join_paths_from(&self, model: &SemanticModel) -> SemanticResult<Vec<SemanticModelJoinPath>> {
        let mut paths = Vec::new();
        let mut frontier = vec![SemanticModelJoinPath::local(model.name.clone())];

        for _ in 0..self.max_entity_links {
            let mut next = Vec::new();
            for path in &frontier {
                let last = self.index.get_semantic_model(path.last_model())?;
                for entity in last.entity_names() {
                    for candidate in self.index.models_with_entity(entity) {
                        if !self.join_evaluator.is_valid_join(last, candidate, entity) {
                            continue;
                        }
                        if let Some(extended) = path.extend(&candidate.name, entity) {
                            next.push(extended);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            paths.extend(next.iter().cloned());
            frontier = next;
        }
        Ok(paths)
    }

    /// Everything a measure can be grouped by, filtered by properties.
    pub fn linkable_elements_for_measure(
        &self,
        measure_name: &str,
        filter: &LinkableElementFilter,
    ) -> SemanticResult<LinkableElementSet> {
        let (model, _) = self.index.get_measure(measure_name)?;
        let mut set = LinkableElementSet::new();

        let local_path = SemanticModelJoinPath::local(model.name.clone());
        self.add_local_elements(model, &local_path, &mut set);

        let join_paths = self.join_paths_from(model)?;
        for path in &join_paths {
            let right = self.index.get_semantic_model(path.last_model())?;
            self.add_joined_elements(right, path, &mut set);
        }

        let (_, native) = self.index.agg_time_dimension(measure_name)?;
        self.add_metric_time(model, native, &mut set);

        for path in std::iter::once(&local_path).chain(join_paths.iter()) {
            if path.len() < self.max_entity_links {
                let last = self.index.get_semantic_model(path.last_model())?;
                self.add_linkable_metrics(last, path, &mut set);
            }
        }

        Ok(set.filter(filter))
    }

    /// Elements every requested metric can be grouped by. With no metrics
    /// this is the distinct-values set.
    pub fn linkable_elements_for_metrics(
        &self,
        metric_names: &[&str],
        filter: &LinkableElementFilter,
    ) -> SemanticResult<LinkableElementSet> {
        if metric_names.is_empty() {
            return self.linkable_elements_for_distinct_values_query(filter);
        }
        let mut sets = Vec::with_capacity(metric_names.len());
        for name in metric_names {
            let mut stack = Vec::new();
            sets.push(self.elements_for_metric(name, &mut stack)?);
        }
        Ok(LinkableElementSet::intersection_by_path_key(&sets).filter(filter))
    }

    fn elements_for_metric(&self, name: &str, stack: &mut Vec<String>) -> SemanticResult<LinkableElementSet> {
        if stack.iter().any(|m| m == name) {
            let mut cycle = stack.clone();
            cycle.push(name.to_string());
            return Err(SemanticError::CyclicDependency(cycle));
        }
        let metric = self.index.get_metric(name)?;
        stack.push(name.to_string());
        let all = LinkableElementFilter::default();
        let invalid = |message: &str| SemanticError::InvalidMetric {
            metric: name.to_string(),
            message: message.to_string(),
        };

        let set = match metric.metric_type {
            MetricType::Simple => {
                let measure = metric
                    .type_params
                    .measure
                    .as_ref()
                    .ok_or_else(|| invalid("simple metric has no measure"))?;
                self.linkable_elements_for_measure(&measure.name, &all)?
            }
            MetricType::Derived | MetricType::Ratio => {
                let mut inputs = Vec::new();
                for input in metric.input_metrics() {
                    inputs.push(self.elements_for_metric(&input.name, stack)?);
                }
                LinkableElementSet::intersection_by_path_key(&inputs)
            }
            MetricType::Cumulative => {
                let input = match metric.cumulative_input() {
                    Some(MeasureOrMetric::Measure(m)) => {
                        self.linkable_elements_for_measure(&m.name, &all)?
                    }
                    Some(MeasureOrMetric::Metric(m)) => self.elements_for_metric(&m.name, stack)?,
                    None => return Err(invalid("cumulative metric has no input")),
                };
                input.filter(&LinkableElementFilter::without_all_of([
                    LinkableElementProperty::MetricTime,
                    LinkableElementProperty::DerivedTimeGranularity,
                ]))
            }
            MetricType::Conversion => match metric.conversion_base_input() {
                Some(MeasureOrMetric::Measure(m)) => {
                    self.linkable_elements_for_measure(&m.name, &all)?
                }
                Some(MeasureOrMetric::Metric(m)) => self.elements_for_metric(&m.name, stack)?,
                None => return Err(invalid("conversion metric has no base input")),
            },
        };

        stack.pop();
        Ok(set)
    }

    /// Local elements of every model plus `metric_time` at the default
    /// granularity, read from the time spine.
    pub fn linkable_elements_for_distinct_values_query(
        &self,
        filter: &LinkableElementFilter,
    ) -> SemanticResult<LinkableElementSet> {
        let mut set = LinkableElementSet::new();
        for model in self.index.semantic_models() {
            let path = SemanticModelJoinPath::local(model.name.clone());
            self.add_local_elements(model, &path, &mut set);
        }
        set.add_dimension(LinkableDimension {
            path_key: ElementPathKey::time_dimension(
                METRIC_TIME,
                vec![],
                DEFAULT_METRIC_TIME_GRANULARITY.into(),
                None,
            ),
            semantic_model_origin: None,
            join_path: SemanticModelJoinPath::local(METRIC_TIME),
            properties: [LinkableElementProperty::MetricTime].into_iter().collect(),
        });
        Ok(set.filter(filter))
    }

    /// Entity links under which a model's own dimensions are addressed.
    fn local_entity_links(model: &SemanticModel) -> Vec<&str> {
        model
            .entity_names()
            .into_iter()
            .filter(|name| match model.entity_type(name) {
                Some(EntityType::Primary | EntityType::Unique | EntityType::Natural) => true,
                Some(EntityType::Foreign) | None => false,
            })
            .collect()
    }

    fn add_local_elements(&self, model: &SemanticModel, path: &SemanticModelJoinPath, set: &mut LinkableElementSet) {
        let links = Self::local_entity_links(model);
        for link in &links {
            self.add_dimensions(model, path, &[link.to_string()], set);
        }

        let entity_props = path_properties(path, &[LinkableElementProperty::Entity]);
        for entity in model.entity_names() {
            self.add_entity(model, path, entity, vec![], &entity_props, set);
            for link in &links {
                if *link != entity {
                    self.add_entity(model, path, entity, vec![link.to_string()], &entity_props, set);
                }
            }
        }
    }

    fn add_joined_elements(&self, model: &SemanticModel, path: &SemanticModelJoinPath, set: &mut LinkableElementSet) {
        let links = path.entity_links();
        self.add_dimensions(model, path, &links, set);

        let entity_props = path_properties(path, &[LinkableElementProperty::Entity]);
        let join_entity = path.path_elements.last().map(|e| e.join_on_entity.as_str());
        for entity in model.entity_names() {
            if Some(entity) == join_entity {
                continue;
            }
            self.add_entity(model, path, entity, links.clone(), &entity_props, set);
        }
    }

    fn add_entity(
        &self,
        model: &SemanticModel,
        path: &SemanticModelJoinPath,
        entity: &str,
        links: Vec<String>,
        properties: &BTreeSet<LinkableElementProperty>,
        set: &mut LinkableElementSet,
    ) {
        if links.iter().any(|l| l == entity) {
            debug!(
                entity,
                semantic_model = %model.name,
                join_path = %path,
                "skipping self-referential entity link"
            );
            return;
        }
        set.add_entity(LinkableEntity {
            path_key: ElementPathKey::entity(entity, links),
            semantic_model_origin: model.name.clone(),
            join_path: path.clone(),
            properties: properties.clone(),
        });
    }

    fn add_dimensions(
        &self,
        model: &SemanticModel,
        path: &SemanticModelJoinPath,
        links: &[String],
        set: &mut LinkableElementSet,
    ) {
        for dimension in &model.dimensions {
            match dimension.dimension_type {
                DimensionType::Categorical => set.add_dimension(LinkableDimension {
                    path_key: ElementPathKey::dimension(&dimension.name, links.to_vec()),
                    semantic_model_origin: Some(model.name.clone()),
                    join_path: path.clone(),
                    properties: path_properties(path, &[]),
                }),
                DimensionType::Time => {
                    let native = dimension.time_granularity().unwrap_or(DEFAULT_METRIC_TIME_GRANULARITY);
                    for (granularity, date_part) in self.time_variants(native) {
                        let derived = granularity.name != native.name() || date_part.is_some();
                        let extra: &[LinkableElementProperty] = if derived {
                            &[LinkableElementProperty::DerivedTimeGranularity]
                        } else {
                            &[]
                        };
                        set.add_dimension(LinkableDimension {
                            path_key: ElementPathKey::time_dimension(
                                &dimension.name,
                                links.to_vec(),
                                granularity,
                                date_part,
                            ),
                            semantic_model_origin: Some(model.name.clone()),
                            join_path: path.clone(),
                            properties: path_properties(path, extra),
                        });
                    }
                }
            }
        }
    }

    fn add_metric_time(&self, model: &SemanticModel, native: TimeGranularity, set: &mut LinkableElementSet) {
        let path = SemanticModelJoinPath::local(model.name.clone());
        for (granularity, date_part) in self.time_variants(native) {
            let mut properties: BTreeSet<_> = [LinkableElementProperty::MetricTime].into_iter().collect();
            if granularity.name != native.name() || date_part.is_some() {
                properties.insert(LinkableElementProperty::DerivedTimeGranularity);
            }
            set.add_dimension(LinkableDimension {
                path_key: ElementPathKey::time_dimension(METRIC_TIME, vec![], granularity, date_part),
                semantic_model_origin: Some(model.name.clone()),
                join_path: path.clone(),
                properties,
            });
        }
    }

    /// Metrics groupable by an entity of `model`, joined onto the end of
    /// `path` through that entity.
    fn add_linkable_metrics(&self, model: &SemanticModel, path: &SemanticModelJoinPath, set: &mut LinkableElementSet) {
        for entity in model.entity_names() {
            if path.uses_entity(entity) {
                continue;
            }
            let mut links = path.entity_links();
            links.push(entity.to_string());
            let mut properties: BTreeSet<_> =
                [LinkableElementProperty::Metric, LinkableElementProperty::Joined]
                    .into_iter()
                    .collect();
            if !path.is_empty() {
                properties.insert(LinkableElementProperty::MultiHop);
            }
            for (metric_name, entities) in &self.groupable_entities {
                if !entities.contains(entity) {
                    continue;
                }
                set.add_metric(LinkableMetric {
                    path_key: ElementPathKey::metric(metric_name, links.clone()),
                    join_by_entity: entity.to_string(),
                    semantic_model_origin: model.name.clone(),
                    join_path: path.clone(),
                    properties: properties.clone(),
                });
            }
        }
    }

    /// Granularities (and date parts) a time dimension can be queried at.
    fn time_variants(&self, native: TimeGranularity) -> Vec<(ExpandedTimeGranularity, Option<DatePart>)> {
        let mut variants: Vec<(ExpandedTimeGranularity, Option<DatePart>)> = Vec::new();
        for granularity in native.coarser_or_equal() {
            variants.push((granularity.into(), None));
            for part in DatePart::compatible_with(granularity) {
                variants.push((granularity.into(), Some(part)));
            }
        }
        for custom in &self.custom_granularities {
            if custom.base_granularity >= native {
                variants.push((custom.clone(), None));
            }
        }
        variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Manifest;
    use serde_json::json;
    use std::sync::Arc;

    fn manifest() -> Manifest {
        serde_json::from_value(json!({
            "semantic_models": [
                {
                    "name": "bookings_source",
                    "node_relation": {"alias": "fct_bookings", "schema_name": "main"},
                    "defaults": {"agg_time_dimension": "ds"},
                    "entities": [
                        {"name": "booking", "type": "primary"},
                        {"name": "listing", "type": "foreign"}
                    ],
                    "measures": [{"name": "bookings", "agg": "sum", "expr": "1"}],
                    "dimensions": [
                        {"name": "ds", "type": "time", "type_params": {"time_granularity": "day"}},
                        {"name": "is_instant", "type": "categorical"}
                    ]
                },
                {
                    "name": "monthly_source",
                    "node_relation": {"alias": "fct_monthly", "schema_name": "main"},
                    "defaults": {"agg_time_dimension": "ds"},
                    "entities": [{"name": "listing", "type": "foreign"}],
                    "measures": [{"name": "monthly_revenue", "agg": "sum"}],
                    "dimensions": [
                        {"name": "ds", "type": "time", "type_params": {"time_granularity": "month"}}
                    ]
                },
                {
                    "name": "listings_latest",
                    "node_relation": {"alias": "dim_listings", "schema_name": "main"},
                    "entities": [
                        {"name": "listing", "type": "primary"},
                        {"name": "user", "type": "foreign"}
                    ],
                    "dimensions": [{"name": "country", "type": "categorical"}]
                },
                {
                    "name": "users",
                    "node_relation": {"alias": "dim_users", "schema_name": "main"},
                    "entities": [{"name": "user", "type": "primary"}],
                    "dimensions": [{"name": "home_state", "type": "categorical"}]
                }
            ],
            "metrics": [
                {"name": "bookings", "type": "simple", "type_params": {"measure": {"name": "bookings"}}},
                {"name": "monthly_revenue", "type": "simple", "type_params": {"measure": {"name": "monthly_revenue"}}},
                {"name": "trailing_bookings", "type": "cumulative", "type_params": {
                    "measure": {"name": "bookings"}, "window": "7 days"}}
            ],
            "project_configuration": {"time_spines": [{
                "node_relation": {"alias": "time_spine", "schema_name": "main"},
                "primary_column": {"name": "ds", "time_granularity": "day"},
                "custom_granularities": [{"name": "fiscal_quarter"}]
            }]}
        }))
        .unwrap()
    }

    fn names(set: &LinkableElementSet) -> Vec<String> {
        set.qualified_names()
    }

    #[test]
    fn test_join_paths_respect_max_links() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let bookings = index.get_semantic_model("bookings_source").unwrap();

        let one_hop = LinkableElementResolver::new(&index, 1).unwrap();
        let paths = one_hop.join_paths_from(bookings).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].last_model(), "listings_latest");

        let two_hops = LinkableElementResolver::new(&index, 2).unwrap();
        let paths = two_hops.join_paths_from(bookings).unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert!(path.len() <= 2);
            let models: BTreeSet<&str> = path.models().collect();
            assert_eq!(models.len(), path.len() + 1);
        }
    }

    #[test]
    fn test_local_joined_and_multi_hop_dimensions() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let set = resolver
            .linkable_elements_for_measure("bookings", &LinkableElementFilter::default())
            .unwrap();
        let names = names(&set);
        assert!(names.contains(&"booking__is_instant".to_string()));
        assert!(names.contains(&"listing__country".to_string()));
        assert!(names.contains(&"listing__user__home_state".to_string()));
        assert!(names.contains(&"booking__ds__day".to_string()));
        assert!(names.contains(&"metric_time__fiscal_quarter".to_string()));
        // Foreign entities do not address local dimensions.
        assert!(!names.contains(&"listing__is_instant".to_string()));

        let key = ElementPathKey::dimension("home_state", vec!["listing".into(), "user".into()]);
        let home_state = &set.dimensions[&key][0];
        assert!(home_state.properties.contains(&LinkableElementProperty::MultiHop));
    }

    #[test]
    fn test_month_measure_has_no_day_metric_time() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 1).unwrap();
        let set = resolver
            .linkable_elements_for_measure("monthly_revenue", &LinkableElementFilter::default())
            .unwrap();
        let metric_time: Vec<&ElementPathKey> = set
            .dimensions
            .keys()
            .filter(|k| k.is_metric_time())
            .collect();
        assert!(metric_time.iter().all(|k| {
            let granularity = k.time_granularity.as_ref().unwrap();
            granularity.base_granularity >= TimeGranularity::Month
                && k.date_part.map_or(true, |p| p.size() >= granularity.base_granularity)
        }));
        let names = names(&set);
        for expected in ["metric_time__month", "metric_time__quarter", "metric_time__year"] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        assert!(!names.contains(&"metric_time__day".to_string()));
        assert!(!names.contains(&"metric_time__fiscal_quarter".to_string()));
    }

    #[test]
    fn test_cumulative_metric_excludes_derived_metric_time() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 1).unwrap();
        let set = resolver
            .linkable_elements_for_metrics(&["trailing_bookings"], &LinkableElementFilter::default())
            .unwrap();
        let names = names(&set);
        assert!(names.contains(&"metric_time__day".to_string()));
        assert!(!names.contains(&"metric_time__month".to_string()));
        assert!(names.contains(&"booking__ds__month".to_string()));
    }

    #[test]
    fn test_intersection_law() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let all = LinkableElementFilter::default();
        let a = resolver.linkable_elements_for_metrics(&["bookings"], &all).unwrap();
        let b = resolver.linkable_elements_for_metrics(&["monthly_revenue"], &all).unwrap();
        let both = resolver
            .linkable_elements_for_metrics(&["bookings", "monthly_revenue"], &all)
            .unwrap();
        let keys = both.path_keys();
        assert!(keys.is_subset(&a.path_keys()));
        assert!(keys.is_subset(&b.path_keys()));
        assert!(keys.contains(&ElementPathKey::dimension("country", vec!["listing".into()])));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let filter = LinkableElementFilter::without_any_of([LinkableElementProperty::Metric]);
        let first = resolver.linkable_elements_for_measure("bookings", &filter).unwrap();
        let second = resolver.linkable_elements_for_measure("bookings", &filter).unwrap();
        assert_eq!(first.path_keys(), second.path_keys());
        assert!(first.metrics.is_empty());
    }

    #[test]
    fn test_linkable_metrics() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let set = resolver
            .linkable_elements_for_measure(
                "bookings",
                &LinkableElementFilter::with_any_of([LinkableElementProperty::Metric]),
            )
            .unwrap();
        let names = names(&set);
        assert!(names.contains(&"booking__bookings".to_string()));
        assert!(names.contains(&"listing__monthly_revenue".to_string()));
    }

    #[test]
    fn test_distinct_values_elements() {
        let index = SemanticModelIndex::new(Arc::new(manifest())).unwrap();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let set = resolver.linkable_elements_for_metrics(&[], &LinkableElementFilter::default()).unwrap();
        let names = names(&set);
        assert!(names.contains(&"listing__country".to_string()));
        assert!(names.contains(&"metric_time__day".to_string()));
        assert!(!names.contains(&"listing__user__home_state".to_string()));
    }
}
