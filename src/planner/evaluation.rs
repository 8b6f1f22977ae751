//! Metric evaluation planning.
//!
//! Turns a list of requested metrics into a set of [`MetricQuery`] batches:
//!
//! ```text
//!   requested metrics
//!         │ collect
//!         ▼
//!   descriptor → input descriptors
//!         │ level assignment (cached per manifest)
//!         ▼
//!   level 0 ──► base queries, one per (model, agg time dim, offset, kind)
//!   level 1..=max ──► recursive queries over already-built queries
//!         │
//!         ▼
//!   top query passing the requested metrics through
//! ```
//!
//! Every collected descriptor is computed by exactly one query. Anything
//! else is a planner defect and fails the whole plan.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use super::descriptor::{MetricDescriptor, MetricOffset};
use super::error::{PlannerError, PlannerResult};
use super::level::MetricLevelCache;
use super::metric_query::{
    BaseMetricQuery, BaseQueryKey, BaseQueryKind, MetricQuery, MetricQueryId, RecursiveMetricQuery,
};
use crate::model::{MeasureOrMetric, Metric, MetricType};
use crate::semantic::{SemanticError, SemanticModelIndex};

/// The complete evaluation plan for one set of requested metrics.
#[derive(Debug, Clone)]
pub struct EvaluationPlan {
    queries: Vec<MetricQuery>,
    top: MetricQueryId,
    requested: Vec<MetricDescriptor>,
    descriptor_inputs: BTreeMap<MetricDescriptor, Vec<MetricDescriptor>>,
    levels: BTreeMap<MetricDescriptor, usize>,
    column_names: BTreeMap<MetricDescriptor, String>,
}

impl EvaluationPlan {
    /// All queries, in build order. A query only depends on queries with a
    /// smaller id.
    pub fn queries(&self) -> &[MetricQuery] {
        &self.queries
    }

    pub fn query(&self, id: MetricQueryId) -> Option<&MetricQuery> {
        self.queries.get(id.0)
    }

    pub fn top(&self) -> MetricQueryId {
        self.top
    }

    pub fn requested(&self) -> &[MetricDescriptor] {
        &self.requested
    }

    /// Every descriptor collected while planning.
    pub fn descriptors(&self) -> impl Iterator<Item = &MetricDescriptor> {
        self.descriptor_inputs.keys()
    }

    pub fn inputs_of(&self, descriptor: &MetricDescriptor) -> &[MetricDescriptor] {
        self.descriptor_inputs
            .get(descriptor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn level_of(&self, descriptor: &MetricDescriptor) -> Option<usize> {
        self.levels.get(descriptor).copied()
    }

    pub fn max_level(&self) -> usize {
        self.levels.values().copied().max().unwrap_or(0)
    }

    /// Column a descriptor's value is carried in between queries.
    pub fn column_name(&self, descriptor: &MetricDescriptor) -> Option<&str> {
        self.column_names.get(descriptor).map(String::as_str)
    }

    pub fn base_queries(&self) -> impl Iterator<Item = &BaseMetricQuery> {
        self.queries.iter().filter_map(|q| match q {
            MetricQuery::Base(base) => Some(base),
            MetricQuery::Recursive(_) => None,
        })
    }

    pub fn recursive_queries(&self) -> impl Iterator<Item = &RecursiveMetricQuery> {
        self.queries.iter().filter_map(|q| match q {
            MetricQuery::Base(_) => None,
            MetricQuery::Recursive(recursive) => Some(recursive),
        })
    }

    /// Input of `query` that outputs `descriptor`.
    pub fn provider(
        &self,
        query: &RecursiveMetricQuery,
        descriptor: &MetricDescriptor,
    ) -> Option<MetricQueryId> {
        query.inputs.iter().copied().find(|id| {
            self.query(*id)
                .map(|q| q.outputs_descriptor(descriptor))
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for EvaluationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evaluation plan (max level {}):", self.max_level())?;
        for query in &self.queries {
            let marker = if query.id() == self.top { "*" } else { " " };
            writeln!(f, "{} {}", marker, query)?;
        }
        Ok(())
    }
}

/// Builds evaluation plans against one manifest.
pub struct MetricEvaluationPlanner<'a> {
    index: &'a SemanticModelIndex,
    levels: &'a MetricLevelCache,
}

impl<'a> MetricEvaluationPlanner<'a> {
    pub fn new(index: &'a SemanticModelIndex, levels: &'a MetricLevelCache) -> Self {
        Self { index, levels }
    }

    pub fn plan(&self, metric_names: &[String]) -> PlannerResult<EvaluationPlan> {
        let requested: Vec<MetricDescriptor> = metric_names
            .iter()
            .map(|name| MetricDescriptor::plain(name.as_str()))
            .collect();

        let mut descriptor_inputs = BTreeMap::new();
        for descriptor in &requested {
            let mut stack = Vec::new();
            self.collect(descriptor, &mut descriptor_inputs, &mut stack)?;
        }

        let levels = self.assign_levels(&descriptor_inputs)?;
        let max_level = levels.values().copied().max().unwrap_or(0);

        let mut queries = self.build_base_queries(&levels)?;
        let mut frontier: Vec<MetricQueryId> = queries.iter().map(MetricQuery::id).collect();

        for level in 1..=max_level {
            let mut at_level: Vec<&MetricDescriptor> = levels
                .iter()
                .filter(|(_, l)| **l == level)
                .map(|(d, _)| d)
                .collect();
            // Most inputs first; the sort is stable so ties keep descriptor order.
            at_level.sort_by_key(|d| std::cmp::Reverse(descriptor_inputs[*d].len()));

            for descriptor in at_level {
                let required = dedup(&descriptor_inputs[descriptor]);
                let query = build_recursive_query(
                    MetricQueryId(queries.len()),
                    vec![descriptor.clone()],
                    &required,
                    descriptor.allows_passed_metrics(),
                    &queries,
                    &mut frontier,
                )?;
                frontier.push(query.id);
                queries.push(MetricQuery::Recursive(query));
            }
        }

        let mut top = build_recursive_query(
            MetricQueryId(queries.len()),
            Vec::new(),
            &dedup(&requested),
            false,
            &queries,
            &mut frontier,
        )?;
        top.passthrough = dedup(&requested);
        let top_id = top.id;
        queries.push(MetricQuery::Recursive(top));

        check_ownership(&descriptor_inputs, &queries)?;

        let column_names = column_names(&descriptor_inputs);
        let plan = EvaluationPlan {
            queries,
            top: top_id,
            requested,
            descriptor_inputs,
            levels,
            column_names,
        };
        debug!(
            base_queries = plan.base_queries().count(),
            recursive_queries = plan.recursive_queries().count(),
            max_level = plan.max_level(),
            "built metric evaluation plan"
        );
        Ok(plan)
    }

    fn collect(
        &self,
        descriptor: &MetricDescriptor,
        descriptor_inputs: &mut BTreeMap<MetricDescriptor, Vec<MetricDescriptor>>,
        stack: &mut Vec<String>,
    ) -> PlannerResult<()> {
        if stack.iter().any(|m| *m == descriptor.metric_name) {
            let mut cycle = stack.clone();
            cycle.push(descriptor.metric_name.clone());
            return Err(SemanticError::CyclicDependency(cycle).into());
        }

        let metric = self.index.get_metric(&descriptor.metric_name)?;
        let children = self.input_descriptors(descriptor, metric)?;

        if let Some(existing) = descriptor_inputs.get(descriptor) {
            if *existing != children {
                return Err(PlannerError::ConflictingInputs {
                    descriptor: descriptor.to_string(),
                });
            }
            return Ok(());
        }
        descriptor_inputs.insert(descriptor.clone(), children.clone());

        stack.push(descriptor.metric_name.clone());
        for child in &children {
            self.collect(child, descriptor_inputs, stack)?;
        }
        stack.pop();
        Ok(())
    }

    /// Descriptors for a metric's input metrics. The parent's filters and
    /// the metric's own filter are pushed down into every input.
    fn input_descriptors(
        &self,
        descriptor: &MetricDescriptor,
        metric: &Metric,
    ) -> PlannerResult<Vec<MetricDescriptor>> {
        let mut inherited = descriptor.filters.clone();
        if let Some(filter) = &metric.filter {
            inherited.extend(filter.templates().map(str::to_string));
        }

        metric
            .input_metrics()
            .into_iter()
            .map(|input| {
                let mut filters = inherited.clone();
                if let Some(filter) = &input.filter {
                    filters.extend(filter.templates().map(str::to_string));
                }
                let offset = match (MetricOffset::from_input(input), &descriptor.offset) {
                    (Some(_), Some(_)) => {
                        return Err(SemanticError::UnsupportedQuery(format!(
                            "metric '{}' applies a time offset to input '{}', which is itself offset",
                            metric.name, input.name
                        ))
                        .into())
                    }
                    (Some(own), None) => Some(own),
                    (None, parent) => parent.clone(),
                };
                Ok(MetricDescriptor {
                    metric_name: input.name.clone(),
                    filters,
                    alias: input.alias.clone(),
                    offset,
                })
            })
            .collect()
    }

    fn assign_levels(
        &self,
        descriptor_inputs: &BTreeMap<MetricDescriptor, Vec<MetricDescriptor>>,
    ) -> PlannerResult<BTreeMap<MetricDescriptor, usize>> {
        let mut levels = BTreeMap::new();
        for descriptor in descriptor_inputs.keys() {
            let level = self.levels.level(self.index, &descriptor.metric_name)?;
            levels.insert(descriptor.clone(), level);
        }

        let max_level = levels.values().copied().max().unwrap_or(0);
        let present: BTreeSet<usize> = levels.values().copied().collect();
        if let Some(missing) = (0..=max_level).find(|l| !present.contains(l)) {
            return Err(PlannerError::NonDenseLevels { missing, max_level });
        }
        Ok(levels)
    }

    fn build_base_queries(
        &self,
        levels: &BTreeMap<MetricDescriptor, usize>,
    ) -> PlannerResult<Vec<MetricQuery>> {
        let mut batches: BTreeMap<BaseQueryKey, Vec<MetricDescriptor>> = BTreeMap::new();
        for (descriptor, _) in levels.iter().filter(|(_, l)| **l == 0) {
            let key = self.base_query_key(descriptor)?;
            batches.entry(key).or_default().push(descriptor.clone());
        }

        Ok(batches
            .into_iter()
            .enumerate()
            .map(|(i, (key, computed))| {
                MetricQuery::Base(BaseMetricQuery {
                    id: MetricQueryId(i),
                    key,
                    computed,
                })
            })
            .collect())
    }

    fn base_query_key(&self, descriptor: &MetricDescriptor) -> PlannerResult<BaseQueryKey> {
        let metric = self.index.get_metric(&descriptor.metric_name)?;
        let invalid = |message: &str| -> PlannerError {
            SemanticError::InvalidMetric {
                metric: metric.name.clone(),
                message: message.to_string(),
            }
            .into()
        };

        let (measure_name, kind) = match metric.metric_type {
            MetricType::Simple => {
                let measure = metric
                    .type_params
                    .measure
                    .as_ref()
                    .ok_or_else(|| invalid("simple metric has no measure"))?;
                (measure.name.as_str(), BaseQueryKind::Standard)
            }
            MetricType::Cumulative => {
                let Some(MeasureOrMetric::Measure(measure)) = metric.cumulative_input() else {
                    return Err(invalid("cumulative metric has no measure input"));
                };
                if descriptor.offset.is_some() {
                    return Err(SemanticError::UnsupportedQuery(format!(
                        "time offsets on cumulative metric '{}' are not supported",
                        metric.name
                    ))
                    .into());
                }
                let kind = BaseQueryKind::Cumulative {
                    window: metric.cumulative_window().cloned(),
                    grain_to_date: metric.cumulative_grain_to_date(),
                    period_agg: metric.cumulative_period_agg(),
                };
                (measure.name.as_str(), kind)
            }
            MetricType::Conversion => {
                let (Some(MeasureOrMetric::Measure(base)), Some(MeasureOrMetric::Measure(_))) =
                    (metric.conversion_base_input(), metric.conversion_input())
                else {
                    return Err(invalid(
                        "conversion metric needs either two measures or two metrics",
                    ));
                };
                if descriptor.offset.is_some() {
                    return Err(SemanticError::UnsupportedQuery(format!(
                        "time offsets on conversion metric '{}' are not supported",
                        metric.name
                    ))
                    .into());
                }
                let kind = BaseQueryKind::Conversion {
                    metric: metric.name.clone(),
                    filters: descriptor.filters.clone(),
                };
                (base.name.as_str(), kind)
            }
            MetricType::Derived | MetricType::Ratio => {
                return Err(invalid("metric has no input metrics"));
            }
        };

        let (model, _) = self.index.get_measure(measure_name)?;
        let (agg_time_dimension, _) = self.index.agg_time_dimension(measure_name)?;
        Ok(BaseQueryKey {
            semantic_model: model.name.clone(),
            agg_time_dimension: agg_time_dimension.name.clone(),
            offset: descriptor.offset.clone(),
            kind,
        })
    }
}

/// Build a query computing `computed` from the frontier queries that own
/// `required`. With passthrough, the chosen inputs leave the frontier and
/// all their outputs are carried by the new query.
fn build_recursive_query(
    id: MetricQueryId,
    computed: Vec<MetricDescriptor>,
    required: &[MetricDescriptor],
    passthrough_inputs: bool,
    queries: &[MetricQuery],
    frontier: &mut Vec<MetricQueryId>,
) -> PlannerResult<RecursiveMetricQuery> {
    let mut inputs: Vec<MetricQueryId> = Vec::new();
    for descriptor in required {
        let owners: Vec<MetricQueryId> = frontier
            .iter()
            .copied()
            .filter(|q| queries[q.0].outputs_descriptor(descriptor))
            .collect();
        match owners.as_slice() {
            [owner] => {
                if !inputs.contains(owner) {
                    inputs.push(*owner);
                }
            }
            _ => {
                return Err(PlannerError::InputQueryCount {
                    descriptor: descriptor.to_string(),
                    count: owners.len(),
                })
            }
        }
    }

    let passthrough = if passthrough_inputs {
        frontier.retain(|q| !inputs.contains(q));
        let mut carried: Vec<MetricDescriptor> = Vec::new();
        for input in &inputs {
            for output in queries[input.0].outputs() {
                if !carried.contains(output) {
                    carried.push(output.clone());
                }
            }
        }
        carried
    } else {
        Vec::new()
    };

    Ok(RecursiveMetricQuery {
        id,
        inputs,
        computed,
        passthrough,
    })
}

fn check_ownership(
    descriptor_inputs: &BTreeMap<MetricDescriptor, Vec<MetricDescriptor>>,
    queries: &[MetricQuery],
) -> PlannerResult<()> {
    for descriptor in descriptor_inputs.keys() {
        let count = queries
            .iter()
            .filter(|q| q.computed_metric_descriptors().contains(descriptor))
            .count();
        if count != 1 {
            return Err(PlannerError::DescriptorOwnership {
                descriptor: descriptor.to_string(),
                count,
            });
        }
    }
    Ok(())
}

/// Plain descriptors keep their metric name; every other usage gets a
/// numbered column.
fn column_names(
    descriptor_inputs: &BTreeMap<MetricDescriptor, Vec<MetricDescriptor>>,
) -> BTreeMap<MetricDescriptor, String> {
    let mut next = 0;
    descriptor_inputs
        .keys()
        .map(|d| {
            let name = if d.allows_passed_metrics() {
                d.metric_name.clone()
            } else {
                next += 1;
                format!("{}__v{}", d.metric_name, next - 1)
            };
            (d.clone(), name)
        })
        .collect()
}

fn dedup(descriptors: &[MetricDescriptor]) -> Vec<MetricDescriptor> {
    let mut seen = BTreeSet::new();
    descriptors
        .iter()
        .filter(|d| seen.insert((*d).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Manifest, MetricTimeWindow, TimeGranularity};
    use serde_json::json;
    use std::sync::Arc;

    fn model(name: &str, measures: &[&str]) -> serde_json::Value {
        let measures: Vec<_> = measures
            .iter()
            .map(|m| json!({"name": m, "agg": "sum"}))
            .collect();
        json!({
            "name": name,
            "node_relation": {"alias": name, "schema_name": "main"},
            "defaults": {"agg_time_dimension": "ds"},
            "entities": [{"name": "listing", "type": "foreign"}],
            "measures": measures,
            "dimensions": [{"name": "ds", "type": "time", "type_params": {"time_granularity": "day"}}]
        })
    }

    fn simple(name: &str) -> serde_json::Value {
        json!({"name": name, "type": "simple", "type_params": {"measure": {"name": name}}})
    }

    fn index() -> SemanticModelIndex {
        let manifest: Manifest = serde_json::from_value(json!({
            "semantic_models": [model("x", &["a", "b"]), model("y", &["c"])],
            "metrics": [
                simple("a"), simple("b"), simple("c"),
                {"name": "d1", "type": "derived", "type_params": {
                    "expr": "a + b", "metrics": [{"name": "a"}, {"name": "b"}]}},
                {"name": "d2", "type": "derived", "type_params": {
                    "expr": "a - c", "metrics": [{"name": "a"}, {"name": "c"}]}},
                {"name": "a_growth", "type": "derived", "type_params": {
                    "expr": "a - a_7d",
                    "metrics": [{"name": "a"}, {"name": "a", "alias": "a_7d", "offset_window": "7 days"}]}},
                {"name": "filtered_ratio", "type": "ratio",
                 "filter": {"where_filters": [{"where_sql_template": "{{ Dimension('listing__country') }} = 'us'"}]},
                 "type_params": {"numerator": {"name": "a"}, "denominator": {"name": "c"}}},
                {"name": "nested", "type": "derived", "type_params": {
                    "expr": "d1 * 2", "metrics": [{"name": "d1"}]}},
                {"name": "cum_a", "type": "cumulative", "type_params": {
                    "measure": {"name": "a"}, "cumulative_type_params": {"window": "7 days"}}},
                {"name": "shifted_cum", "type": "derived", "type_params": {
                    "expr": "cum_a", "metrics": [{"name": "cum_a", "offset_window": "1 day"}]}},
                {"name": "loop_a", "type": "derived", "type_params": {
                    "expr": "loop_b", "metrics": [{"name": "loop_b"}]}},
                {"name": "loop_b", "type": "derived", "type_params": {
                    "expr": "loop_a", "metrics": [{"name": "loop_a"}]}}
            ]
        }))
        .unwrap();
        SemanticModelIndex::new(Arc::new(manifest)).unwrap()
    }

    fn plan(metrics: &[&str]) -> PlannerResult<EvaluationPlan> {
        let index = index();
        let cache = MetricLevelCache::new("test");
        let names: Vec<String> = metrics.iter().map(|m| m.to_string()).collect();
        MetricEvaluationPlanner::new(&index, &cache).plan(&names)
    }

    #[test]
    fn test_simple_metrics_share_base_query() {
        let plan = plan(&["a", "b"]).unwrap();
        let bases: Vec<_> = plan.base_queries().collect();
        assert_eq!(bases.len(), 1);
        assert_eq!(bases[0].key.semantic_model, "x");
        assert_eq!(bases[0].computed.len(), 2);

        let top = plan.query(plan.top()).unwrap();
        assert_eq!(top.input_queries(), &[MetricQueryId(0)]);
        assert_eq!(top.passthrough_metric_descriptors().len(), 2);
        assert_eq!(plan.max_level(), 0);
    }

    #[test]
    fn test_shared_input_computed_once() {
        let plan = plan(&["d1", "d2"]).unwrap();

        let bases: Vec<_> = plan.base_queries().collect();
        assert_eq!(bases.len(), 2);
        assert_eq!(bases[0].key.semantic_model, "x");
        assert_eq!(
            bases[0].computed,
            vec![MetricDescriptor::plain("a"), MetricDescriptor::plain("b")]
        );
        assert_eq!(bases[1].computed, vec![MetricDescriptor::plain("c")]);

        let a = MetricDescriptor::plain("a");
        let computing_a = plan
            .queries()
            .iter()
            .filter(|q| q.computed_metric_descriptors().contains(&a))
            .count();
        assert_eq!(computing_a, 1);

        let top = plan.query(plan.top()).unwrap();
        for metric in ["d1", "d2"] {
            let d = MetricDescriptor::plain(metric);
            assert!(top.outputs_descriptor(&d));
            let provider = match top {
                MetricQuery::Recursive(q) => plan.provider(q, &d),
                MetricQuery::Base(_) => None,
            };
            assert!(provider.is_some());
        }
    }

    #[test]
    fn test_passthrough_chain() {
        let plan = plan(&["d1", "d2"]).unwrap();
        let recursive: Vec<_> = plan.recursive_queries().collect();
        // d1, d2 and the top query
        assert_eq!(recursive.len(), 3);
        let first = recursive[0];
        assert_eq!(first.computed, vec![MetricDescriptor::plain("d1")]);
        assert_eq!(first.inputs, vec![MetricQueryId(0)]);
        let second = recursive[1];
        assert_eq!(second.computed, vec![MetricDescriptor::plain("d2")]);
        assert_eq!(second.inputs, vec![first.id, MetricQueryId(1)]);
        assert!(second.passthrough.contains(&MetricDescriptor::plain("d1")));
        assert_eq!(recursive[2].inputs, vec![second.id]);
    }

    #[test]
    fn test_offset_input_is_separate_descriptor() {
        let plan = plan(&["a_growth"]).unwrap();
        let bases: Vec<_> = plan.base_queries().collect();
        assert_eq!(bases.len(), 2);
        let offset = MetricOffset::Window(MetricTimeWindow::new(7, TimeGranularity::Day));
        assert!(bases.iter().any(|b| b.key.offset == Some(offset.clone())));

        let shifted = MetricDescriptor {
            alias: Some("a_7d".into()),
            offset: Some(offset),
            ..MetricDescriptor::plain("a")
        };
        assert_eq!(plan.column_name(&shifted), Some("a__v0"));
        assert_eq!(plan.column_name(&MetricDescriptor::plain("a")), Some("a"));
    }

    #[test]
    fn test_metric_filter_pushed_to_inputs() {
        let plan = plan(&["filtered_ratio"]).unwrap();
        let inputs = plan.inputs_of(&MetricDescriptor::plain("filtered_ratio"));
        assert_eq!(inputs.len(), 2);
        for input in inputs {
            assert_eq!(input.filters.len(), 1);
            assert!(!input.allows_passed_metrics());
        }
        let names: Vec<_> = inputs.iter().filter_map(|d| plan.column_name(d)).collect();
        assert_eq!(names, vec!["a__v0", "c__v1"]);
    }

    #[test]
    fn test_nested_levels() {
        let plan = plan(&["nested", "a"]).unwrap();
        assert_eq!(plan.max_level(), 2);
        assert_eq!(plan.level_of(&MetricDescriptor::plain("nested")), Some(2));
        let top = plan.query(plan.top()).unwrap();
        assert!(top.outputs_descriptor(&MetricDescriptor::plain("a")));
        assert!(top.outputs_descriptor(&MetricDescriptor::plain("nested")));
    }

    #[test]
    fn test_cumulative_base_query() {
        let plan = plan(&["cum_a", "a"]).unwrap();
        let kinds: Vec<_> = plan.base_queries().map(|b| b.key.kind.clone()).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&BaseQueryKind::Standard));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, BaseQueryKind::Cumulative { window: Some(w), .. } if w.count == 7)));
    }

    #[test]
    fn test_offset_cumulative_unsupported() {
        let err = plan(&["shifted_cum"]).unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Semantic(SemanticError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let err = plan(&["loop_a"]).unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Semantic(SemanticError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_unknown_metric() {
        assert_eq!(
            plan(&["nope"]).unwrap_err(),
            PlannerError::Semantic(SemanticError::UnknownMetric("nope".into()))
        );
    }

    #[test]
    fn test_display() {
        let plan = plan(&["d1"]).unwrap();
        let text = plan.to_string();
        assert!(text.starts_with("Evaluation plan (max level 1):"));
        assert!(text.contains("q0 base x (ds): computes a, b"));
        assert!(text.contains("  q1 from [q0]: computes d1; passes a, b"));
        assert!(text.contains("* q2 from [q1]: passes d1"));
    }
}
