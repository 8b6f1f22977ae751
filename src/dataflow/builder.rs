//! Dataflow plan construction.
//!
//! Every base query reads its semantic model, joins in whatever the
//! group-by and filters need, and aggregates:
//!
//! ```text
//! standard    read ─► join ─► where ─► aggregate
//! offset      read ─► join ─► spine join (shifted) ─► where ─► aggregate
//! cumulative  read ─► join ─► spine join (window) ─► where ─► aggregate
//! conversion  base events ─► where ──────────────┬─► aggregate ─┐
//!             conversion events ─► match ◄───────┘   aggregate ─┴► combine ─► compute
//! ```
//!
//! Recursive queries combine their inputs on the group-by columns and
//! compute derived values. A cumulative metric over another metric joins
//! the input's rows to the time spine the same way a cumulative measure
//! does, then sums them per spine period. The top query feeds a final ordering node and the
//! result sink.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::debug;

use super::{
    AggregateMeasuresNode, CombineAggregatedOutputsNode, ComputeMetricsNode, DataflowNode,
    DataflowNodeId, DataflowPlan, DataflowPlanArena, JoinOnEntitiesNode, JoinToTimeSpineNode,
    MatchConversionEventsNode, NodeJoin, OrderByLimitNode, ProjectColumnsNode, ReadSqlSourceNode,
    WhereConstraintNode,
};
use crate::model::{
    AggregationType, ConversionCalculationType, ConversionTypeParams, Dimension, Measure,
    MeasureOrMetric, Metric, MetricInputMeasure, MetricTimeWindow, MetricType, SemanticModel,
    TimeGranularity, TimeSpine, WindowChoice,
};
use crate::planner::{
    BaseMetricQuery, BaseQueryKind, EvaluationPlan, MetricDescriptor, MetricOffset, MetricQuery,
    MetricQueryId, PlannerError, PlannerResult, RecursiveMetricQuery,
};
use crate::query::{
    resolve_element_name, OutputTarget, ResolvedFilter, ResolvedQuery, TimeConstraint,
    WhereFilterSpec,
};
use crate::semantic::{
    ElementPathKey, JoinPathElement, LinkableElementFilter, LinkableElementResolver,
    LinkableElementSet, LinkableElementType, SemanticError, SemanticModelIndex,
    SemanticModelJoinPath, SemanticResult, DEFAULT_METRIC_TIME_GRANULARITY,
};
use crate::sql::expr::{
    aggregate, and_all, between, case_when, coalesce, col_ref, column, compare, date_trunc, eq,
    extract, lit_int, lit_str, ratio, string_expr, subtract_interval, SqlPercentileFunctionParams,
    SqlStringExpression, SqlWindowOrderBy, WindowFrame,
};
use crate::sql::{
    Dialect, JoinType, SelectColumn, SqlBindParameters, SqlComparison, SqlDialect, SqlExpr,
    SqlFunction, SqlPercentileFunctionType, SqlWindowFunction,
};

/// Measure time at the agg time dimension's native granularity.
pub const METRIC_TIME_COLUMN: &str = "__metric_time";

const SPINE_TIME_COLUMN: &str = "__spine_time";
const CONVERSION_ENTITY_COLUMN: &str = "__conversion_entity";
const EVENT_ID_COLUMN: &str = "__event_id";
const BASE_EVENTS_COLUMN: &str = "__base_events";
const CONVERSIONS_COLUMN: &str = "__conversions";

const LEFT_ALIAS: &str = "src";
const SPINE_ALIAS: &str = "ts";
const SHIFTED_ALIAS: &str = "s";
const BASE_ALIAS: &str = "b";
const CONVERSION_ALIAS: &str = "c";

pub struct DataflowPlanBuilder<'a> {
    index: &'a SemanticModelIndex,
    resolver: &'a LinkableElementResolver<'a>,
    dialect: Dialect,
}

impl<'a> DataflowPlanBuilder<'a> {
    pub fn new(
        index: &'a SemanticModelIndex,
        resolver: &'a LinkableElementResolver<'a>,
        dialect: Dialect,
    ) -> Self {
        Self {
            index,
            resolver,
            dialect,
        }
    }

    /// Dataflow for a metric query.
    pub fn build(&self, query: &ResolvedQuery, plan: &EvaluationPlan) -> PlannerResult<DataflowPlan> {
        let mut arena = DataflowPlanArena::default();
        let mut query_nodes: BTreeMap<MetricQueryId, DataflowNodeId> = BTreeMap::new();

        for metric_query in plan.queries() {
            let node = match metric_query {
                MetricQuery::Base(base) => self.base_query(&mut arena, query, plan, base)?,
                MetricQuery::Recursive(recursive) => {
                    self.recursive_query(&mut arena, query, plan, recursive, &query_nodes)?
                }
            };
            query_nodes.insert(metric_query.id(), node);
        }

        let top = query_nodes.get(&plan.top()).copied().ok_or_else(|| {
            PlannerError::InvariantViolation(format!("top query {} was not built", plan.top()))
        })?;
        let sink = self.finish(&mut arena, query, top);
        let dataflow = arena.finish(sink);
        debug!(
            nodes = dataflow.nodes().len(),
            ctes = dataflow.ctes().len(),
            "built dataflow plan"
        );
        Ok(dataflow)
    }

    /// Dataflow for a query without metrics: the distinct values of the
    /// group-by items.
    pub fn build_distinct_values(&self, query: &ResolvedQuery) -> PlannerResult<DataflowPlan> {
        if !query.is_distinct_values() {
            return Err(PlannerError::InvariantViolation(
                "distinct values requested for a metric query".to_string(),
            ));
        }
        let keys = required_keys(query, &[]);
        let group_by = group_by_columns(query);
        let mut arena = DataflowPlanArena::default();

        let rows = if keys.iter().all(ElementPathKey::is_metric_time) {
            let spine = self
                .index
                .manifest()
                .time_spine_for(DEFAULT_METRIC_TIME_GRANULARITY)
                .ok_or_else(|| {
                    SemanticError::MissingTimeSpine(DEFAULT_METRIC_TIME_GRANULARITY.to_string())
                })?;
            let read = arena.add(read_time_spine(spine));
            let mut columns = vec![SelectColumn::new(
                date_trunc(
                    DEFAULT_METRIC_TIME_GRANULARITY,
                    column(&spine.primary_column.name),
                ),
                METRIC_TIME_COLUMN,
            )];
            for key in &keys {
                let expr = standard_time_expr(column(&spine.primary_column.name), key)?;
                columns.push(SelectColumn::new(expr, key.qualified_name()));
            }
            let times = arena.add(DataflowNode::ProjectColumns(ProjectColumnsNode {
                parent: read,
                columns,
                distinct: false,
            }));
            self.where_node(
                &mut arena,
                times,
                &query.where_filters,
                query.time_constraint.as_ref(),
            )
        } else if keys.iter().any(ElementPathKey::is_metric_time) {
            return Err(SemanticError::UnsupportedQuery(
                "metric_time cannot be combined with semantic model elements in a query without metrics"
                    .to_string(),
            )
            .into());
        } else {
            let model_name = distinct_values_model(&keys, &query.linkable_elements)?;
            let model = self.index.get_semantic_model(&model_name)?;
            let mut join = SourceJoin::new(&mut arena, self.index, model, None);
            for key in &keys {
                join.add_key(&mut arena, key, &query.linkable_elements, &model_name)?;
            }
            let joined = join.finish(&mut arena);
            self.where_node(&mut arena, joined, &query.where_filters, None)
        };

        let distinct = arena.add(DataflowNode::ProjectColumns(ProjectColumnsNode {
            parent: rows,
            columns: group_by
                .iter()
                .map(|name| SelectColumn::new(column(name), name.clone()))
                .collect(),
            distinct: true,
        }));
        let sink = self.finish(&mut arena, query, distinct);
        Ok(arena.finish(sink))
    }

    fn finish(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        parent: DataflowNodeId,
    ) -> DataflowNodeId {
        let ordered = arena.add(DataflowNode::OrderByLimit(OrderByLimitNode {
            parent,
            columns: query.output_columns(),
            order_by: query
                .order_by
                .iter()
                .map(|item| (item.column_name.clone(), item.descending))
                .collect(),
            limit: query.limit,
        }));
        match &query.output {
            OutputTarget::DataTable => {
                arena.add(DataflowNode::WriteToResultDataTable { parent: ordered })
            }
            OutputTarget::Table(table_name) => arena.add(DataflowNode::WriteToResultTable {
                parent: ordered,
                table_name: table_name.clone(),
            }),
        }
    }

    // =========================================================================
    // Base queries
    // =========================================================================

    fn base_query(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        plan: &EvaluationPlan,
        base: &BaseMetricQuery,
    ) -> PlannerResult<DataflowNodeId> {
        match &base.key.kind {
            BaseQueryKind::Conversion { metric, filters } => {
                self.conversion_query(arena, query, plan, base, metric, filters)
            }
            BaseQueryKind::Standard | BaseQueryKind::Cumulative { .. } => {
                self.measure_query(arena, query, plan, base)
            }
        }
    }

    fn measure_query(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        plan: &EvaluationPlan,
        base: &BaseMetricQuery,
    ) -> PlannerResult<DataflowNodeId> {
        let model = self.index.get_semantic_model(&base.key.semantic_model)?;

        let mut aggregations = Vec::with_capacity(base.computed.len());
        for descriptor in &base.computed {
            let metric = self.index.get_metric(&descriptor.metric_name)?;
            let input = measure_input(metric)?;
            let (_, measure) = self.index.get_measure(&input.name)?;
            let set = self.measure_elements(&input.name)?;
            let filters = resolve_filters(
                descriptor
                    .filters
                    .iter()
                    .map(String::as_str)
                    .chain(metric.filter.iter().flat_map(|f| f.templates()))
                    .chain(input.filter.iter().flat_map(|f| f.templates())),
                &set,
            )?;
            aggregations.push(MeasureAggregation {
                column: column_name(plan, descriptor)?,
                metric,
                measure,
                input,
                filters,
            });
        }
        let Some(first) = aggregations.first() else {
            return Err(PlannerError::InvariantViolation(format!(
                "base query {} computes nothing",
                base.id
            )));
        };
        let (time_dimension, native) = self.index.agg_time_dimension(&first.input.name)?;
        let set = self.measure_elements(&first.input.name)?;

        let descriptor_filters: Vec<ResolvedFilter> = aggregations
            .iter()
            .flat_map(|a| a.filters.iter().cloned())
            .collect();
        let keys = required_keys(query, &descriptor_filters);

        let metric_time_keys: Vec<&ElementPathKey> =
            keys.iter().filter(|k| k.is_metric_time()).collect();
        let cumulative = matches!(base.key.kind, BaseQueryKind::Cumulative { .. });
        let by_metric_time = query.group_by.iter().any(ElementPathKey::is_metric_time);
        let rekeyed = base.key.offset.is_some() || (cumulative && by_metric_time);
        if cumulative && by_metric_time && base.key.offset.is_some() {
            return Err(SemanticError::UnsupportedQuery(format!(
                "cumulative metric '{}' cannot be offset when grouped by metric_time",
                first.metric.name
            ))
            .into());
        }
        if rekeyed {
            for key in &metric_time_keys {
                if key.time_granularity.as_ref().is_some_and(|g| g.is_custom()) {
                    return Err(SemanticError::UnsupportedQuery(format!(
                        "'{}' cannot be used with time offsets or cumulative metrics",
                        key.qualified_name()
                    ))
                    .into());
                }
            }
        }

        let mut join = SourceJoin::new(arena, self.index, model, Some(time_dimension));
        for key in &keys {
            join.add_key(arena, key, &set, &first.metric.name)?;
        }
        join.add_column(
            METRIC_TIME_COLUMN,
            date_trunc(native, col_ref(LEFT_ALIAS, &time_dimension.name)),
        );

        let time_partition: Vec<SqlExpr> = query
            .group_by
            .iter()
            .filter(|k| k.is_metric_time() && k.date_part.is_none())
            .filter_map(|k| join.column_expr(&k.qualified_name()))
            .collect();
        for aggregation in &aggregations {
            let measure = aggregation.measure;
            let value = match &measure.non_additive_dimension {
                Some(nad) => {
                    let boundary = col_ref(LEFT_ALIAS, &nad.name);
                    let mut partition_by: Vec<SqlExpr> = nad
                        .window_groupings
                        .iter()
                        .map(|entity| col_ref(LEFT_ALIAS, entity))
                        .collect();
                    partition_by.extend(time_partition.iter().cloned());
                    let order = match nad.window_choice {
                        WindowChoice::Max => SqlWindowOrderBy::desc(boundary.clone()),
                        WindowChoice::Min => SqlWindowOrderBy::asc(boundary.clone()),
                    };
                    let edge = SqlExpr::WindowFunction {
                        function: SqlWindowFunction::FirstValue,
                        args: vec![boundary.clone()],
                        partition_by,
                        order_by: vec![order],
                        frame: Some(WindowFrame::rows_entire_partition()),
                    };
                    case_when(eq(boundary, edge), col_ref(LEFT_ALIAS, &measure.name))
                }
                None => col_ref(LEFT_ALIAS, &measure.name),
            };
            join.add_column(&measure.name, value);
        }
        let mut node = join.finish(arena);

        if let Some(offset) = &base.key.offset {
            let offset = offset.clone();
            node = self.join_to_time_spine(
                arena,
                node,
                native,
                METRIC_TIME_COLUMN,
                &metric_time_keys,
                move |rows, spine| match offset {
                    MetricOffset::Window(window) => {
                        eq(rows, subtract_interval(spine, window.count, window.granularity))
                    }
                    MetricOffset::ToGrain(granularity) => eq(rows, date_trunc(granularity, spine)),
                },
            )?;
        } else if let (
            BaseQueryKind::Cumulative {
                window,
                grain_to_date,
                ..
            },
            true,
        ) = (&base.key.kind, rekeyed)
        {
            node = self.join_to_time_spine(
                arena,
                node,
                native,
                METRIC_TIME_COLUMN,
                &metric_time_keys,
                cumulative_condition(window.clone(), *grain_to_date),
            )?;
        }

        let node = self.where_node(
            arena,
            node,
            &query.where_filters,
            query.time_constraint.as_ref(),
        );

        let mut aggregates = Vec::with_capacity(aggregations.len());
        for aggregation in &aggregations {
            aggregates.push(SelectColumn::new(
                self.aggregate_expr(aggregation)?,
                aggregation.column.clone(),
            ));
        }
        Ok(arena.add_cte(
            DataflowNode::AggregateMeasures(AggregateMeasuresNode {
                parent: node,
                group_by: group_by_columns(query),
                aggregates,
            }),
            format!("base_{}_{}", base.id.0, model.name),
        ))
    }

    fn conversion_query(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        plan: &EvaluationPlan,
        base: &BaseMetricQuery,
        metric_name: &str,
        filters: &BTreeSet<String>,
    ) -> PlannerResult<DataflowNodeId> {
        let metric = self.index.get_metric(metric_name)?;
        let params = conversion_params(metric)?;
        let (Some(MeasureOrMetric::Measure(base_input)), Some(MeasureOrMetric::Measure(conversion_input))) =
            (metric.conversion_base_input(), metric.conversion_input())
        else {
            return Err(invalid_metric(metric, "conversion base query needs two measures"));
        };
        let group_by = group_by_columns(query);

        // Base events: the opportunities to convert, carrying the group-by.
        let (base_model, base_measure) = self.index.get_measure(&base_input.name)?;
        let (base_time, base_native) = self.index.agg_time_dimension(&base_input.name)?;
        let base_set = self.measure_elements(&base_input.name)?;
        let base_filters = resolve_filters(
            filters
                .iter()
                .map(String::as_str)
                .chain(metric.filter.iter().flat_map(|f| f.templates()))
                .chain(base_input.filter.iter().flat_map(|f| f.templates())),
            &base_set,
        )?;
        if base_model.get_entity(&params.entity).is_none() {
            return Err(invalid_metric(
                metric,
                &format!("entity '{}' is not defined on '{}'", params.entity, base_model.name),
            ));
        }

        let mut join = SourceJoin::new(arena, self.index, base_model, Some(base_time));
        for key in required_keys(query, &base_filters) {
            join.add_key(arena, &key, &base_set, &metric.name)?;
        }
        join.add_column(
            METRIC_TIME_COLUMN,
            date_trunc(base_native, col_ref(LEFT_ALIAS, &base_time.name)),
        );
        join.add_column(CONVERSION_ENTITY_COLUMN, col_ref(LEFT_ALIAS, &params.entity));
        for (i, property) in params.constant_properties.iter().enumerate() {
            let key = constant_property_key(metric, &property.base_property, &base_set)?;
            let expr = join.key_expr(arena, &key, &base_set, &metric.name)?;
            join.add_column(&constant_column(i), expr);
        }
        join.add_column(&base_measure.name, col_ref(LEFT_ALIAS, &base_measure.name));
        let base_events = join.finish(arena);
        let base_events = self.where_node(
            arena,
            base_events,
            &[query.where_filters.as_slice(), base_filters.as_slice()].concat(),
            query.time_constraint.as_ref(),
        );

        // Conversion events, each with a fresh id.
        let (conversion_model, conversion_measure) = self.index.get_measure(&conversion_input.name)?;
        let (conversion_time, conversion_native) =
            self.index.agg_time_dimension(&conversion_input.name)?;
        let conversion_set = self.measure_elements(&conversion_input.name)?;
        if conversion_model.get_entity(&params.entity).is_none() {
            return Err(invalid_metric(
                metric,
                &format!(
                    "entity '{}' is not defined on '{}'",
                    params.entity, conversion_model.name
                ),
            ));
        }
        let mut join = SourceJoin::new(arena, self.index, conversion_model, Some(conversion_time));
        join.add_column(
            METRIC_TIME_COLUMN,
            date_trunc(conversion_native, col_ref(LEFT_ALIAS, &conversion_time.name)),
        );
        join.add_column(CONVERSION_ENTITY_COLUMN, col_ref(LEFT_ALIAS, &params.entity));
        for (i, property) in params.constant_properties.iter().enumerate() {
            let key = constant_property_key(metric, &property.conversion_property, &conversion_set)?;
            let expr = join.key_expr(arena, &key, &conversion_set, &metric.name)?;
            join.add_column(&constant_column(i), expr);
        }
        join.add_column(
            &conversion_measure.name,
            col_ref(LEFT_ALIAS, &conversion_measure.name),
        );
        join.add_column(EVENT_ID_COLUMN, SqlExpr::GenerateUuid);
        let conversion_events = join.finish(arena);

        // Each conversion is credited to the latest base event before it.
        let base_time_col = col_ref(BASE_ALIAS, METRIC_TIME_COLUMN);
        let conversion_time_col = col_ref(CONVERSION_ALIAS, METRIC_TIME_COLUMN);
        let mut on = vec![
            eq(
                col_ref(BASE_ALIAS, CONVERSION_ENTITY_COLUMN),
                col_ref(CONVERSION_ALIAS, CONVERSION_ENTITY_COLUMN),
            ),
            compare(
                base_time_col.clone(),
                SqlComparison::LessThanOrEquals,
                conversion_time_col.clone(),
            ),
        ];
        if let Some(window) = &params.window {
            on.push(compare(
                base_time_col.clone(),
                SqlComparison::GreaterThan,
                subtract_interval(conversion_time_col, window.count, window.granularity),
            ));
        }
        for i in 0..params.constant_properties.len() {
            let name = constant_column(i);
            on.push(eq(col_ref(BASE_ALIAS, &name), col_ref(CONVERSION_ALIAS, &name)));
        }
        let latest_base = |name: &str| SqlExpr::WindowFunction {
            function: SqlWindowFunction::FirstValue,
            args: vec![col_ref(BASE_ALIAS, name)],
            partition_by: vec![col_ref(CONVERSION_ALIAS, EVENT_ID_COLUMN)],
            order_by: vec![SqlWindowOrderBy::desc(base_time_col.clone())],
            frame: Some(WindowFrame::rows_entire_partition()),
        };
        let mut columns = vec![SelectColumn::new(
            col_ref(CONVERSION_ALIAS, EVENT_ID_COLUMN),
            EVENT_ID_COLUMN,
        )];
        for name in &group_by {
            columns.push(SelectColumn::new(latest_base(name), name.clone()));
        }
        columns.push(SelectColumn::new(
            col_ref(CONVERSION_ALIAS, &conversion_measure.name),
            conversion_measure.name.clone(),
        ));
        let matched = arena.add(DataflowNode::MatchConversionEvents(MatchConversionEventsNode {
            conversion: conversion_events,
            conversion_alias: CONVERSION_ALIAS.to_string(),
            base: base_events,
            base_alias: BASE_ALIAS.to_string(),
            on: and_all(on),
            columns,
        }));

        let opportunities = arena.add(DataflowNode::AggregateMeasures(AggregateMeasuresNode {
            parent: base_events,
            group_by: group_by.clone(),
            aggregates: vec![SelectColumn::new(
                self.aggregate_expr(&MeasureAggregation {
                    column: BASE_EVENTS_COLUMN.to_string(),
                    metric,
                    measure: base_measure,
                    input: base_input,
                    filters: Vec::new(),
                })?,
                BASE_EVENTS_COLUMN,
            )],
        }));
        let conversions = arena.add(DataflowNode::AggregateMeasures(AggregateMeasuresNode {
            parent: matched,
            group_by: group_by.clone(),
            aggregates: vec![SelectColumn::new(
                self.aggregate_expr(&MeasureAggregation {
                    column: CONVERSIONS_COLUMN.to_string(),
                    metric,
                    measure: conversion_measure,
                    input: conversion_input,
                    filters: Vec::new(),
                })?,
                CONVERSIONS_COLUMN,
            )],
        }));
        let combined = combine(arena, &[opportunities, conversions], &group_by)?;

        let mut columns = Vec::with_capacity(base.computed.len());
        for descriptor in &base.computed {
            columns.push(SelectColumn::new(
                conversion_expr(params, BASE_EVENTS_COLUMN, CONVERSIONS_COLUMN),
                column_name(plan, descriptor)?,
            ));
        }
        Ok(arena.add_cte(
            DataflowNode::ComputeMetrics(ComputeMetricsNode {
                parent: combined,
                group_by,
                columns,
            }),
            format!("base_{}_{}", base.id.0, base_model.name),
        ))
    }

    // =========================================================================
    // Recursive queries
    // =========================================================================

    fn recursive_query(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        plan: &EvaluationPlan,
        recursive: &RecursiveMetricQuery,
        query_nodes: &BTreeMap<MetricQueryId, DataflowNodeId>,
    ) -> PlannerResult<DataflowNodeId> {
        let group_by = group_by_columns(query);
        let mut parents = Vec::with_capacity(recursive.inputs.len());
        for input in &recursive.inputs {
            let node = query_nodes.get(input).copied().ok_or_else(|| {
                PlannerError::InvariantViolation(format!(
                    "{} reads {} before it is built",
                    recursive.id, input
                ))
            })?;
            parents.push(node);
        }
        let mut parent = combine(arena, &parents, &group_by)?;

        let mut cumulative = Vec::new();
        for descriptor in &recursive.computed {
            let metric = self.index.get_metric(&descriptor.metric_name)?;
            if metric.metric_type != MetricType::Cumulative {
                continue;
            }
            let input = plan.inputs_of(descriptor).first().ok_or_else(|| {
                PlannerError::InvariantViolation(format!("metric {} has no input", descriptor))
            })?;
            cumulative.push(self.cumulative_over_metric(
                arena,
                query,
                parent,
                metric,
                &column_name(plan, input)?,
                &column_name(plan, descriptor)?,
                format!("cumulative_{}_{}", recursive.id.0, metric.name),
            )?);
        }
        if !cumulative.is_empty() {
            cumulative.insert(0, parent);
            parent = combine(arena, &cumulative, &group_by)?;
        }

        let mut columns = Vec::new();
        for descriptor in &recursive.computed {
            columns.push(SelectColumn::new(
                self.metric_expr(plan, descriptor)?,
                column_name(plan, descriptor)?,
            ));
        }
        for descriptor in &recursive.passthrough {
            let name = column_name(plan, descriptor)?;
            columns.push(SelectColumn::new(column(&name), name));
        }
        Ok(arena.add_cte(
            DataflowNode::ComputeMetrics(ComputeMetricsNode {
                parent,
                group_by,
                columns,
            }),
            format!("compute_{}", recursive.id.0),
        ))
    }

    /// Sums an input metric over a window of metric time. Input rows join
    /// every spine period whose window covers them, so periods with no
    /// input rows still accumulate what came before.
    #[allow(clippy::too_many_arguments)]
    fn cumulative_over_metric(
        &self,
        arena: &mut DataflowPlanArena,
        query: &ResolvedQuery,
        parent: DataflowNodeId,
        metric: &Metric,
        input_column: &str,
        output_column: &str,
        cte_name: String,
    ) -> PlannerResult<DataflowNodeId> {
        let (time_key, granularity) = cumulative_time_key(query, metric)?;
        let time_column = time_key.qualified_name();
        let metric_time_keys: Vec<&ElementPathKey> =
            query.group_by.iter().filter(|k| k.is_metric_time()).collect();
        let mut node = self.join_to_time_spine(
            arena,
            parent,
            granularity,
            &time_column,
            &metric_time_keys,
            cumulative_condition(
                metric.cumulative_window().cloned(),
                metric.cumulative_grain_to_date(),
            ),
        )?;

        if let Some(constraint) = &query.time_constraint {
            let columns = arena
                .node(node)
                .map(DataflowNode::output_columns)
                .unwrap_or_default();
            node = arena.add(DataflowNode::WhereConstraint(WhereConstraintNode {
                parent: node,
                condition: between(
                    column(&time_column),
                    SqlExpr::CastToTimestamp(Box::new(lit_str(&constraint.start))),
                    SqlExpr::CastToTimestamp(Box::new(lit_str(&constraint.end))),
                ),
                columns,
            }));
        }

        Ok(arena.add_cte(
            DataflowNode::AggregateMeasures(AggregateMeasuresNode {
                parent: node,
                group_by: group_by_columns(query),
                aggregates: vec![SelectColumn::new(
                    aggregate(SqlFunction::Sum, column(input_column)),
                    output_column,
                )],
            }),
            cte_name,
        ))
    }

    /// Value of a metric computed from its input metrics' columns.
    fn metric_expr(
        &self,
        plan: &EvaluationPlan,
        descriptor: &MetricDescriptor,
    ) -> PlannerResult<SqlExpr> {
        let metric = self.index.get_metric(&descriptor.metric_name)?;
        let inputs = plan.inputs_of(descriptor);
        let input_column = |i: usize| -> PlannerResult<String> {
            let input = inputs.get(i).ok_or_else(|| {
                PlannerError::InvariantViolation(format!(
                    "metric {} is missing input {}",
                    descriptor, i
                ))
            })?;
            column_name(plan, input)
        };

        match metric.metric_type {
            MetricType::Derived => {
                let expr = metric
                    .type_params
                    .expr
                    .as_deref()
                    .ok_or_else(|| invalid_metric(metric, "derived metric has no expr"))?;
                let mut columns = Vec::with_capacity(inputs.len());
                for input in inputs {
                    columns.push((input.output_name().to_string(), column_name(plan, input)?));
                }
                self.rewrite_derived_expr(expr, &columns)
            }
            MetricType::Ratio => Ok(ratio(column(&input_column(0)?), column(&input_column(1)?))),
            // summed by cumulative_over_metric
            MetricType::Cumulative => Ok(column(&column_name(plan, descriptor)?)),
            MetricType::Conversion => Ok(conversion_expr(
                conversion_params(metric)?,
                &input_column(0)?,
                &input_column(1)?,
            )),
            MetricType::Simple => Err(PlannerError::InvariantViolation(format!(
                "simple metric '{}' planned as a recursive query",
                metric.name
            ))),
        }
    }

    /// Replace input names in a derived expression with their columns.
    fn rewrite_derived_expr(&self, expr: &str, columns: &[(String, String)]) -> PlannerResult<SqlExpr> {
        if columns.is_empty() {
            return Ok(string_expr(expr));
        }
        let mut names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_by_key(|name| std::cmp::Reverse(name.len()));
        let alternation: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
        let pattern = Regex::new(&format!(r"\b(?:{})\b", alternation.join("|")))
            .map_err(|e| PlannerError::InvariantViolation(format!("input name pattern: {}", e)))?;

        let sql = pattern
            .replace_all(expr, |caps: &regex::Captures<'_>| {
                let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                columns
                    .iter()
                    .find(|(name, _)| name == matched)
                    .map(|(_, column)| self.dialect.quote_identifier(column))
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned();
        Ok(SqlExpr::String(SqlStringExpression {
            sql,
            used_columns: Some(columns.iter().map(|(_, column)| column.clone()).collect()),
            bind_parameters: SqlBindParameters::new(),
            requires_parenthesis: true,
        }))
    }

    // =========================================================================
    // Shared pieces
    // =========================================================================

    fn measure_elements(&self, measure_name: &str) -> SemanticResult<LinkableElementSet> {
        self.resolver
            .linkable_elements_for_measure(measure_name, &LinkableElementFilter::default())
    }

    /// Rows of `parent` re-keyed by time spine periods. `condition` relates
    /// the parent's `time_column` to the spine's.
    fn join_to_time_spine(
        &self,
        arena: &mut DataflowPlanArena,
        parent: DataflowNodeId,
        native: TimeGranularity,
        time_column: &str,
        metric_time_keys: &[&ElementPathKey],
        condition: impl FnOnce(SqlExpr, SqlExpr) -> SqlExpr,
    ) -> PlannerResult<DataflowNodeId> {
        let spine = self
            .index
            .manifest()
            .time_spine_for(native)
            .ok_or_else(|| SemanticError::MissingTimeSpine(native.to_string()))?;
        let read = arena.add(read_time_spine(spine));
        let periods = arena.add(DataflowNode::ProjectColumns(ProjectColumnsNode {
            parent: read,
            columns: vec![SelectColumn::new(
                date_trunc(native, column(&spine.primary_column.name)),
                SPINE_TIME_COLUMN,
            )],
            distinct: true,
        }));

        let spine_time = col_ref(SPINE_ALIAS, SPINE_TIME_COLUMN);
        let parent_columns = arena
            .node(parent)
            .map(DataflowNode::output_columns)
            .unwrap_or_default();
        let mut columns = Vec::with_capacity(parent_columns.len());
        for name in parent_columns {
            let expr = if name == time_column {
                spine_time.clone()
            } else if let Some(key) = metric_time_keys.iter().find(|k| k.qualified_name() == name) {
                standard_time_expr(spine_time.clone(), key)?
            } else {
                col_ref(SHIFTED_ALIAS, &name)
            };
            columns.push(SelectColumn::new(expr, name));
        }

        Ok(arena.add(DataflowNode::JoinToTimeSpine(JoinToTimeSpineNode {
            spine: periods,
            spine_alias: SPINE_ALIAS.to_string(),
            parent,
            parent_alias: SHIFTED_ALIAS.to_string(),
            on: condition(col_ref(SHIFTED_ALIAS, time_column), spine_time),
            columns,
        })))
    }

    /// Applies where filters and the query's time constraint on metric time.
    fn where_node(
        &self,
        arena: &mut DataflowPlanArena,
        parent: DataflowNodeId,
        filters: &[ResolvedFilter],
        time_constraint: Option<&TimeConstraint>,
    ) -> DataflowNodeId {
        let mut conditions: Vec<SqlExpr> = filters
            .iter()
            .map(|f| string_expr(&f.render(self.dialect)))
            .collect();
        if let Some(constraint) = time_constraint {
            conditions.push(between(
                column(METRIC_TIME_COLUMN),
                SqlExpr::CastToTimestamp(Box::new(lit_str(&constraint.start))),
                SqlExpr::CastToTimestamp(Box::new(lit_str(&constraint.end))),
            ));
        }
        if conditions.is_empty() {
            return parent;
        }
        let columns = arena
            .node(parent)
            .map(DataflowNode::output_columns)
            .unwrap_or_default();
        arena.add(DataflowNode::WhereConstraint(WhereConstraintNode {
            parent,
            condition: and_all(conditions),
            columns,
        }))
    }

    fn aggregate_expr(&self, aggregation: &MeasureAggregation<'_>) -> PlannerResult<SqlExpr> {
        let measure = aggregation.measure;
        let mut arg = column(&measure.name);
        if measure.agg == AggregationType::SumBoolean {
            arg = SqlExpr::Case {
                conditions: vec![(arg, lit_int(1))],
                else_value: Some(Box::new(lit_int(0))),
            };
        }
        if !aggregation.filters.is_empty() {
            let conditions = aggregation
                .filters
                .iter()
                .map(|f| string_expr(&f.render(self.dialect)))
                .collect();
            arg = case_when(and_all(conditions), arg);
        }

        let expr = match SqlFunction::from_aggregation_type(measure.agg) {
            Some(function) => aggregate(function, arg),
            None => {
                let params = measure.agg_params.clone().unwrap_or_default();
                let (percentile, function_type) = match measure.agg {
                    AggregationType::Median => (
                        0.5,
                        SqlPercentileFunctionType::from_flags(false, params.use_approximate_percentile),
                    ),
                    AggregationType::Percentile => {
                        let percentile = params.percentile.ok_or_else(|| {
                            invalid_metric(
                                aggregation.metric,
                                &format!("percentile measure '{}' has no percentile", measure.name),
                            )
                        })?;
                        (
                            percentile,
                            SqlPercentileFunctionType::from_flags(
                                params.use_discrete_percentile,
                                params.use_approximate_percentile,
                            ),
                        )
                    }
                    AggregationType::Sum
                    | AggregationType::SumBoolean
                    | AggregationType::Count
                    | AggregationType::CountDistinct
                    | AggregationType::Min
                    | AggregationType::Max
                    | AggregationType::Average => {
                        return Err(PlannerError::InvariantViolation(format!(
                            "no aggregate function for measure '{}'",
                            measure.name
                        )))
                    }
                };
                if !self.dialect.supports_percentile(function_type) {
                    return Err(SemanticError::UnsupportedQuery(format!(
                        "{} does not support {:?} percentiles (measure '{}')",
                        self.dialect.name(),
                        function_type,
                        measure.name
                    ))
                    .into());
                }
                SqlExpr::Percentile {
                    arg: Box::new(arg),
                    params: SqlPercentileFunctionParams {
                        percentile,
                        function_type,
                    },
                }
            }
        };

        Ok(match aggregation.input.fill_nulls_with {
            Some(value) => coalesce(vec![expr, lit_int(value)]),
            None => expr,
        })
    }
}

/// One measure aggregated into one output column.
struct MeasureAggregation<'m> {
    column: String,
    metric: &'m Metric,
    measure: &'m Measure,
    input: &'m MetricInputMeasure,
    filters: Vec<ResolvedFilter>,
}

/// Joins and columns of one [`JoinOnEntitiesNode`] under construction.
struct SourceJoin<'b> {
    index: &'b SemanticModelIndex,
    model: &'b SemanticModel,
    time_dimension: Option<&'b Dimension>,
    left: DataflowNodeId,
    joins: Vec<NodeJoin>,
    path_aliases: BTreeMap<Vec<JoinPathElement>, String>,
    /// Custom granularity joins: time expression, granularity, alias.
    spine_joins: Vec<(SqlExpr, String, String)>,
    columns: Vec<SelectColumn>,
}

impl<'b> SourceJoin<'b> {
    fn new(
        arena: &mut DataflowPlanArena,
        index: &'b SemanticModelIndex,
        model: &'b SemanticModel,
        time_dimension: Option<&'b Dimension>,
    ) -> Self {
        let left = arena.add(read_semantic_model(model));
        Self {
            index,
            model,
            time_dimension,
            left,
            joins: Vec::new(),
            path_aliases: BTreeMap::new(),
            spine_joins: Vec::new(),
            columns: Vec::new(),
        }
    }

    fn column_expr(&self, name: &str) -> Option<SqlExpr> {
        self.columns
            .iter()
            .find(|c| c.alias == name)
            .map(|c| c.expr.clone())
    }

    fn add_column(&mut self, name: &str, expr: SqlExpr) {
        if self.columns.iter().all(|c| c.alias != name) {
            self.columns.push(SelectColumn::new(expr, name));
        }
    }

    fn add_key(
        &mut self,
        arena: &mut DataflowPlanArena,
        key: &ElementPathKey,
        set: &LinkableElementSet,
        scope: &str,
    ) -> PlannerResult<()> {
        let name = key.qualified_name();
        if self.column_expr(&name).is_none() {
            let expr = self.key_expr(arena, key, set, scope)?;
            self.columns.push(SelectColumn::new(expr, name));
        }
        Ok(())
    }

    /// Expression reading `key`, joining models and spines as needed.
    fn key_expr(
        &mut self,
        arena: &mut DataflowPlanArena,
        key: &ElementPathKey,
        set: &LinkableElementSet,
        scope: &str,
    ) -> PlannerResult<SqlExpr> {
        let base = if key.is_metric_time() {
            let dimension = self.time_dimension.ok_or_else(|| {
                SemanticError::UnsupportedQuery(format!(
                    "'{}' needs an aggregation time dimension",
                    key.qualified_name()
                ))
            })?;
            col_ref(LEFT_ALIAS, &dimension.name)
        } else {
            let path = self.join_path_for(key, set, scope)?;
            let alias = self.model_alias(arena, &path)?;
            col_ref(&alias, &key.element_name)
        };
        self.time_expr(arena, base, key)
    }

    /// The unique shortest path from this model to `key`.
    fn join_path_for(
        &self,
        key: &ElementPathKey,
        set: &LinkableElementSet,
        scope: &str,
    ) -> SemanticResult<SemanticModelJoinPath> {
        let paths: Vec<&SemanticModelJoinPath> = match key.element_type {
            LinkableElementType::Dimension | LinkableElementType::TimeDimension => set
                .dimensions
                .get(key)
                .map(|elements| elements.iter().map(|e| &e.join_path).collect())
                .unwrap_or_default(),
            LinkableElementType::Entity => set
                .entities
                .get(key)
                .map(|elements| elements.iter().map(|e| &e.join_path).collect())
                .unwrap_or_default(),
            LinkableElementType::Metric => {
                return Err(SemanticError::UnsupportedQuery(format!(
                    "metric '{}' cannot be read from a semantic model",
                    key.qualified_name()
                )))
            }
        };
        let paths: Vec<&SemanticModelJoinPath> = paths
            .into_iter()
            .filter(|p| p.left_model == self.model.name)
            .collect();
        let unknown = || SemanticError::UnknownGroupBy {
            name: key.qualified_name(),
            metrics: vec![scope.to_string()],
        };
        let shortest = paths.iter().map(|p| p.len()).min().ok_or_else(unknown)?;
        let candidates: BTreeSet<&SemanticModelJoinPath> =
            paths.into_iter().filter(|p| p.len() == shortest).collect();
        if candidates.len() > 1 {
            return Err(SemanticError::AmbiguousGroupBy {
                name: key.qualified_name(),
                candidates: candidates.len(),
            });
        }
        candidates.into_iter().next().cloned().ok_or_else(unknown)
    }

    /// Alias of the model at the end of `path`, joining each hop once.
    fn model_alias(
        &mut self,
        arena: &mut DataflowPlanArena,
        path: &SemanticModelJoinPath,
    ) -> SemanticResult<String> {
        let mut alias = LEFT_ALIAS.to_string();
        for depth in 0..path.path_elements.len() {
            let prefix = path.path_elements[..=depth].to_vec();
            if let Some(existing) = self.path_aliases.get(&prefix) {
                alias = existing.clone();
                continue;
            }
            let hop = &path.path_elements[depth];
            let right = self.index.get_semantic_model(&hop.right_model)?;
            let node = arena.add(read_semantic_model(right));
            let right_alias = format!("j{}", self.path_aliases.len());
            self.joins.push(NodeJoin {
                join_type: JoinType::Left,
                node,
                alias: right_alias.clone(),
                on: Some(eq(
                    col_ref(&alias, &hop.join_on_entity),
                    col_ref(&right_alias, &hop.join_on_entity),
                )),
            });
            self.path_aliases.insert(prefix, right_alias.clone());
            alias = right_alias;
        }
        Ok(alias)
    }

    fn time_expr(
        &mut self,
        arena: &mut DataflowPlanArena,
        base: SqlExpr,
        key: &ElementPathKey,
    ) -> PlannerResult<SqlExpr> {
        let Some(granularity) = key.time_granularity.as_ref().filter(|g| g.is_custom()) else {
            return standard_time_expr(base, key);
        };
        if key.date_part.is_some() {
            return standard_time_expr(base, key);
        }
        let (spine, spine_column) = self
            .index
            .manifest()
            .time_spine_for_custom(&granularity.name)
            .ok_or_else(|| SemanticError::MissingTimeSpine(granularity.name.clone()))?;

        let existing = self
            .spine_joins
            .iter()
            .find(|(expr, name, _)| *name == granularity.name && expr.matches(&base))
            .map(|(_, _, alias)| alias.clone());
        let alias = match existing {
            Some(alias) => alias,
            None => {
                let node = arena.add(read_time_spine(spine));
                let alias = format!("c{}", self.spine_joins.len());
                self.joins.push(NodeJoin {
                    join_type: JoinType::Left,
                    node,
                    alias: alias.clone(),
                    on: Some(eq(
                        date_trunc(spine.primary_column.time_granularity, base.clone()),
                        col_ref(&alias, &spine.primary_column.name),
                    )),
                });
                self.spine_joins
                    .push((base, granularity.name.clone(), alias.clone()));
                alias
            }
        };
        Ok(col_ref(&alias, spine_column))
    }

    fn finish(self, arena: &mut DataflowPlanArena) -> DataflowNodeId {
        arena.add(DataflowNode::JoinOnEntities(JoinOnEntitiesNode {
            left: self.left,
            left_alias: LEFT_ALIAS.to_string(),
            joins: self.joins,
            columns: self.columns,
        }))
    }
}

/// Time expression for a standard granularity or date part.
fn standard_time_expr(base: SqlExpr, key: &ElementPathKey) -> PlannerResult<SqlExpr> {
    match (&key.time_granularity, key.date_part) {
        (_, Some(part)) => Ok(extract(part, base)),
        (Some(granularity), None) if granularity.is_custom() => {
            Err(SemanticError::UnsupportedQuery(format!(
                "custom granularity '{}' is not available here",
                granularity.name
            ))
            .into())
        }
        (Some(granularity), None) => Ok(date_trunc(granularity.base_granularity, base)),
        (None, None) => Ok(base),
    }
}

/// Joins aggregated outputs on the group-by columns. A single input is
/// returned unchanged.
fn combine(
    arena: &mut DataflowPlanArena,
    parents: &[DataflowNodeId],
    group_by: &[String],
) -> PlannerResult<DataflowNodeId> {
    if let [single] = parents {
        return Ok(*single);
    }
    let mut aliased = Vec::with_capacity(parents.len());
    let mut value_columns: Vec<(String, String)> = Vec::new();
    for (i, parent) in parents.iter().enumerate() {
        let alias = format!("i{}", i);
        let node = arena.node(*parent).ok_or_else(|| {
            PlannerError::InvariantViolation(format!("combining unknown node {}", parent))
        })?;
        for name in node.output_columns() {
            if !group_by.contains(&name) && value_columns.iter().all(|(c, _)| *c != name) {
                value_columns.push((name, alias.clone()));
            }
        }
        aliased.push((*parent, alias));
    }
    Ok(arena.add(DataflowNode::CombineAggregatedOutputs(
        CombineAggregatedOutputsNode {
            parents: aliased,
            group_by: group_by.to_vec(),
            value_columns,
        },
    )))
}

/// Spine join condition for a cumulative window, or for grain-to-date
/// when there is no window.
fn cumulative_condition(
    window: Option<MetricTimeWindow>,
    grain_to_date: Option<TimeGranularity>,
) -> impl FnOnce(SqlExpr, SqlExpr) -> SqlExpr {
    move |rows, spine| {
        let mut conditions = vec![compare(
            rows.clone(),
            SqlComparison::LessThanOrEquals,
            spine.clone(),
        )];
        if let Some(window) = window {
            conditions.push(compare(
                rows,
                SqlComparison::GreaterThan,
                subtract_interval(spine, window.count, window.granularity),
            ));
        } else if let Some(granularity) = grain_to_date {
            conditions.push(compare(
                rows,
                SqlComparison::GreaterThanOrEquals,
                date_trunc(granularity, spine),
            ));
        }
        and_all(conditions)
    }
}

/// Finest standard-granularity metric_time in the group-by. Date parts are
/// derived from it; custom granularities have no spine period to join on.
fn cumulative_time_key<'q>(
    query: &'q ResolvedQuery,
    metric: &Metric,
) -> PlannerResult<(&'q ElementPathKey, TimeGranularity)> {
    let mut finest: Option<(&ElementPathKey, TimeGranularity)> = None;
    for key in query.group_by.iter().filter(|k| k.is_metric_time()) {
        if key.date_part.is_some() {
            continue;
        }
        match &key.time_granularity {
            Some(granularity) if !granularity.is_custom() => {
                let base = granularity.base_granularity;
                if finest.map_or(true, |(_, current)| base < current) {
                    finest = Some((key, base));
                }
            }
            _ => {
                return Err(SemanticError::UnsupportedQuery(format!(
                    "cumulative metric '{}' needs metric_time at a standard granularity, not '{}'",
                    metric.name,
                    key.qualified_name()
                ))
                .into())
            }
        }
    }
    finest.ok_or_else(|| {
        SemanticError::UnsupportedQuery(format!(
            "cumulative metric '{}' over a metric needs metric_time in the group-by",
            metric.name
        ))
        .into()
    })
}

fn conversion_expr(params: &ConversionTypeParams, base_column: &str, conversion_column: &str) -> SqlExpr {
    let conversions = coalesce(vec![column(conversion_column), lit_int(0)]);
    match params.calculation {
        ConversionCalculationType::Conversions => conversions,
        ConversionCalculationType::ConversionRate => ratio(conversions, column(base_column)),
    }
}

fn conversion_params(metric: &Metric) -> PlannerResult<&ConversionTypeParams> {
    metric
        .type_params
        .conversion_type_params
        .as_ref()
        .ok_or_else(|| invalid_metric(metric, "conversion metric has no conversion_type_params"))
}

fn constant_property_key(
    metric: &Metric,
    property: &str,
    set: &LinkableElementSet,
) -> PlannerResult<ElementPathKey> {
    resolve_element_name(property, set)?.ok_or_else(|| {
        invalid_metric(
            metric,
            &format!("constant property '{}' is not reachable", property),
        )
    })
}

fn constant_column(i: usize) -> String {
    format!("__constant_{}", i)
}

fn measure_input(metric: &Metric) -> PlannerResult<&MetricInputMeasure> {
    match metric.metric_type {
        MetricType::Simple => metric
            .type_params
            .measure
            .as_ref()
            .ok_or_else(|| invalid_metric(metric, "simple metric has no measure")),
        MetricType::Cumulative => match metric.cumulative_input() {
            Some(MeasureOrMetric::Measure(input)) => Ok(input),
            Some(MeasureOrMetric::Metric(_)) | None => {
                Err(invalid_metric(metric, "cumulative base query needs a measure input"))
            }
        },
        MetricType::Derived | MetricType::Ratio | MetricType::Conversion => Err(
            PlannerError::InvariantViolation(format!(
                "{} metric '{}' planned as a measure query",
                metric.metric_type, metric.name
            )),
        ),
    }
}

fn invalid_metric(metric: &Metric, message: &str) -> PlannerError {
    SemanticError::InvalidMetric {
        metric: metric.name.clone(),
        message: message.to_string(),
    }
    .into()
}

fn resolve_filters<'t>(
    templates: impl Iterator<Item = &'t str>,
    set: &LinkableElementSet,
) -> SemanticResult<Vec<ResolvedFilter>> {
    let templates: BTreeSet<&str> = templates.collect();
    templates
        .into_iter()
        .map(|template| WhereFilterSpec::parse(template).resolve(set))
        .collect()
}

fn column_name(plan: &EvaluationPlan, descriptor: &MetricDescriptor) -> PlannerResult<String> {
    plan.column_name(descriptor)
        .map(str::to_string)
        .ok_or_else(|| PlannerError::InvariantViolation(format!("no column for {}", descriptor)))
}

fn group_by_columns(query: &ResolvedQuery) -> Vec<String> {
    query.group_by.iter().map(ElementPathKey::qualified_name).collect()
}

/// Group-by keys, then every key a filter reads.
fn required_keys(query: &ResolvedQuery, extra_filters: &[ResolvedFilter]) -> Vec<ElementPathKey> {
    let mut keys: Vec<ElementPathKey> = Vec::new();
    let filter_keys = query
        .where_filters
        .iter()
        .chain(extra_filters)
        .flat_map(|f| f.path_keys().into_iter().cloned());
    for key in query.group_by.iter().cloned().chain(filter_keys) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// The semantic model that defines every key of a distinct-values query.
fn distinct_values_model(keys: &[ElementPathKey], set: &LinkableElementSet) -> PlannerResult<String> {
    let mut shared: Option<BTreeSet<String>> = None;
    for key in keys {
        let models: BTreeSet<String> = set
            .dimensions
            .get(key)
            .into_iter()
            .flatten()
            .map(|d| d.join_path.left_model.clone())
            .chain(
                set.entities
                    .get(key)
                    .into_iter()
                    .flatten()
                    .map(|e| e.join_path.left_model.clone()),
            )
            .collect();
        shared = Some(match shared {
            Some(acc) => acc.intersection(&models).cloned().collect(),
            None => models,
        });
    }
    let shared = shared.unwrap_or_default();
    if shared.len() > 1 {
        debug!(candidates = ?shared, "distinct values available from several semantic models");
    }
    shared.into_iter().next().ok_or_else(|| {
        SemanticError::UnsupportedQuery(
            "group-by items of a query without metrics must come from one semantic model"
                .to_string(),
        )
        .into()
    })
}

fn source_column(expr: &str, name: &str) -> SelectColumn {
    let is_identifier = !expr.is_empty()
        && expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !expr.starts_with(|c: char| c.is_ascii_digit());
    if is_identifier {
        SelectColumn::new(column(expr), name)
    } else {
        SelectColumn::new(string_expr(expr), name)
    }
}

/// Every entity, dimension and measure of a model under its own name.
fn read_semantic_model(model: &SemanticModel) -> DataflowNode {
    let mut columns: Vec<SelectColumn> = Vec::new();
    let elements = model
        .entities
        .iter()
        .map(|e| (e.name.as_str(), e.column_expr()))
        .chain(model.dimensions.iter().map(|d| (d.name.as_str(), d.column_expr())))
        .chain(model.measures.iter().map(|m| (m.name.as_str(), m.column_expr())));
    for (name, expr) in elements {
        if columns.iter().all(|c| c.alias != name) {
            columns.push(source_column(expr, name));
        }
    }
    DataflowNode::ReadSqlSource(ReadSqlSourceNode {
        source_name: model.name.clone(),
        relation: model.node_relation.relation_name(),
        columns,
    })
}

fn read_time_spine(spine: &TimeSpine) -> DataflowNode {
    let mut columns = vec![source_column(&spine.primary_column.name, &spine.primary_column.name)];
    for custom in &spine.custom_granularities {
        let name = custom.column_name();
        if columns.iter().all(|c| c.alias != name) {
            columns.push(source_column(name, name));
        }
    }
    DataflowNode::ReadSqlSource(ReadSqlSourceNode {
        source_name: "time_spine".to_string(),
        relation: spine.node_relation.relation_name(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Manifest;
    use crate::planner::{MetricEvaluationPlanner, MetricLevelCache};
    use crate::query::{resolve_query, QueryRequest};
    use serde_json::json;
    use std::sync::Arc;

    fn index() -> SemanticModelIndex {
        let manifest: Manifest = serde_json::from_value(json!({
            "semantic_models": [
                {
                    "name": "bookings_source",
                    "node_relation": {"alias": "fct_bookings", "schema_name": "main"},
                    "defaults": {"agg_time_dimension": "ds"},
                    "entities": [
                        {"name": "booking", "type": "primary"},
                        {"name": "listing", "type": "foreign", "expr": "listing_id"}
                    ],
                    "measures": [
                        {"name": "bookings", "agg": "sum", "expr": "1"},
                        {"name": "booking_value", "agg": "sum"}
                    ],
                    "dimensions": [
                        {"name": "ds", "type": "time", "type_params": {"time_granularity": "day"}},
                        {"name": "is_instant", "type": "categorical"}
                    ]
                },
                {
                    "name": "listings_latest",
                    "node_relation": {"alias": "dim_listings", "schema_name": "main"},
                    "entities": [{"name": "listing", "type": "primary", "expr": "listing_id"}],
                    "dimensions": [{"name": "country", "type": "categorical"}]
                }
            ],
            "metrics": [
                {"name": "bookings", "type": "simple", "type_params": {"measure": {"name": "bookings"}}},
                {"name": "booking_value", "type": "simple", "type_params": {"measure": {"name": "booking_value"}}},
                {"name": "instant_bookings", "type": "simple",
                 "type_params": {"measure": {"name": "bookings"}},
                 "filter": {"where_filters": [{"where_sql_template": "{{ Dimension('booking__is_instant') }}"}]}},
                {"name": "value_per_booking", "type": "ratio", "type_params": {
                    "numerator": {"name": "booking_value"}, "denominator": {"name": "bookings"}}},
                {"name": "bookings_growth", "type": "derived", "type_params": {
                    "expr": "bookings - bookings_7d",
                    "metrics": [
                        {"name": "bookings"},
                        {"name": "bookings", "alias": "bookings_7d", "offset_window": "7 days"}
                    ]}},
                {"name": "trailing_bookings", "type": "cumulative", "type_params": {
                    "measure": {"name": "bookings"}, "window": "7 days"}},
                {"name": "trailing_bookings_of_metric", "type": "cumulative", "type_params": {
                    "cumulative_type_params": {"metric": {"name": "bookings"}, "window": "7 days"}}}
            ],
            "project_configuration": {"time_spines": [{
                "node_relation": {"alias": "time_spine", "schema_name": "main"},
                "primary_column": {"name": "ds", "time_granularity": "day"}
            }]}
        }))
        .unwrap();
        SemanticModelIndex::new(Arc::new(manifest)).unwrap()
    }

    fn build(index: &SemanticModelIndex, request: QueryRequest) -> PlannerResult<DataflowPlan> {
        let resolver = LinkableElementResolver::new(index, 2).unwrap();
        let query = resolve_query(index, &resolver, &request)?;
        let builder = DataflowPlanBuilder::new(index, &resolver, Dialect::DuckDb);
        if query.is_distinct_values() {
            return builder.build_distinct_values(&query);
        }
        let levels = MetricLevelCache::new("test");
        let plan = MetricEvaluationPlanner::new(index, &levels).plan(&query.metrics)?;
        builder.build(&query, &plan)
    }

    fn kinds(plan: &DataflowPlan) -> Vec<&'static str> {
        plan.nodes().iter().map(DataflowNode::kind).collect()
    }

    #[test]
    fn test_simple_metric_joins_listing() {
        let index = index();
        let plan = build(
            &index,
            QueryRequest::new()
                .metric("bookings")
                .group_by("metric_time__day")
                .group_by("listing__country"),
        )
        .unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                "ReadSqlSource",
                "ReadSqlSource",
                "JoinOnEntities",
                "AggregateMeasures",
                "ComputeMetrics",
                "OrderByLimit",
                "WriteToResultDataTable"
            ]
        );
        let Some(DataflowNode::JoinOnEntities(join)) = plan.node(DataflowNodeId(2)) else {
            panic!("expected a join node");
        };
        assert_eq!(join.joins.len(), 1);
        assert_eq!(join.joins[0].alias, "j0");
        assert_eq!(plan.cte_name(DataflowNodeId(3)), Some("base_0_bookings_source"));
        assert_eq!(plan.cte_name(DataflowNodeId(4)), Some("compute_1"));
    }

    #[test]
    fn test_metric_filter_becomes_case_inside_aggregate() {
        let index = index();
        let plan = build(&index, QueryRequest::new().metric("instant_bookings")).unwrap();
        let aggregate = plan
            .nodes()
            .iter()
            .find_map(|n| match n {
                DataflowNode::AggregateMeasures(a) => Some(a),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            aggregate.aggregates[0].expr.to_sql(Dialect::DuckDb),
            r#"SUM(CASE WHEN "booking__is_instant" THEN "bookings" ELSE NULL END)"#
        );
    }

    #[test]
    fn test_offset_joins_time_spine() {
        let index = index();
        let plan = build(
            &index,
            QueryRequest::new().metric("bookings_growth").group_by("metric_time"),
        )
        .unwrap();
        let spine_join = plan
            .nodes()
            .iter()
            .find_map(|n| match n {
                DataflowNode::JoinToTimeSpine(j) => Some(j),
                _ => None,
            })
            .unwrap();
        let on = spine_join.on.to_sql(Dialect::DuckDb);
        assert!(on.starts_with(r#""s"."__metric_time" = "#), "{}", on);
        assert!(on.contains("7 * INTERVAL '1 day'"), "{}", on);
    }

    #[test]
    fn test_cumulative_window_condition() {
        let index = index();
        let plan = build(
            &index,
            QueryRequest::new().metric("trailing_bookings").group_by("metric_time"),
        )
        .unwrap();
        assert!(kinds(&plan).contains(&"JoinToTimeSpine"));
    }

    #[test]
    fn test_cumulative_without_metric_time_skips_spine() {
        let index = index();
        let plan = build(&index, QueryRequest::new().metric("trailing_bookings")).unwrap();
        assert!(!kinds(&plan).contains(&"JoinToTimeSpine"));
    }

    #[test]
    fn test_cumulative_over_metric_joins_time_spine() {
        let index = index();
        let plan = build(
            &index,
            QueryRequest::new()
                .metric("trailing_bookings_of_metric")
                .group_by("metric_time__day")
                .group_by("listing__country"),
        )
        .unwrap();
        let spine_join = plan
            .nodes()
            .iter()
            .find_map(|n| match n {
                DataflowNode::JoinToTimeSpine(j) => Some(j),
                _ => None,
            })
            .unwrap();
        let on = spine_join.on.to_sql(Dialect::DuckDb);
        assert!(on.contains(r#""s"."metric_time__day""#), "{}", on);
        assert!(on.contains("7 * INTERVAL '1 day'"), "{}", on);

        let (id, _) = plan
            .ctes()
            .iter()
            .find(|(_, name)| name.starts_with("cumulative_"))
            .unwrap();
        let Some(DataflowNode::AggregateMeasures(summed)) = plan.node(*id) else {
            panic!("expected an aggregate node");
        };
        assert_eq!(summed.group_by.len(), 2);
        assert!(summed.group_by.contains(&"listing__country".to_string()));
        assert_eq!(summed.aggregates[0].expr.to_sql(Dialect::DuckDb), r#"SUM("bookings")"#);

        let compute = plan
            .nodes()
            .iter()
            .find_map(|n| match n {
                DataflowNode::ComputeMetrics(c)
                    if c.columns.iter().any(|c| c.alias == "trailing_bookings_of_metric") =>
                {
                    Some(c)
                }
                _ => None,
            })
            .unwrap();
        assert!(compute
            .columns
            .iter()
            .all(|c| !c.expr.to_sql(Dialect::DuckDb).contains("OVER")));
    }

    #[test]
    fn test_cumulative_over_metric_needs_metric_time() {
        let index = index();
        let err = build(
            &index,
            QueryRequest::new()
                .metric("trailing_bookings_of_metric")
                .group_by("listing__country"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Semantic(SemanticError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_ratio_combines_nothing_when_inputs_share_query() {
        let index = index();
        let plan = build(&index, QueryRequest::new().metric("value_per_booking")).unwrap();
        assert!(!kinds(&plan).contains(&"CombineAggregatedOutputs"));
    }

    #[test]
    fn test_distinct_values() {
        let index = index();
        let plan = build(&index, QueryRequest::new().group_by("listing__country")).unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                "ReadSqlSource",
                "JoinOnEntities",
                "ProjectColumns",
                "OrderByLimit",
                "WriteToResultDataTable"
            ]
        );
    }

    #[test]
    fn test_distinct_values_mixing_metric_time_unsupported() {
        let index = index();
        let err = build(
            &index,
            QueryRequest::new().group_by("metric_time").group_by("listing__country"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlannerError::Semantic(SemanticError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_rewrite_derived_expr_longest_name_first() {
        let index = index();
        let resolver = LinkableElementResolver::new(&index, 2).unwrap();
        let builder = DataflowPlanBuilder::new(&index, &resolver, Dialect::Postgres);
        let expr = builder
            .rewrite_derived_expr(
                "bookings - bookings_7d",
                &[
                    ("bookings".into(), "bookings".into()),
                    ("bookings_7d".into(), "bookings__v0".into()),
                ],
            )
            .unwrap();
        assert_eq!(
            expr.to_sql(Dialect::Postgres),
            r#""bookings" - "bookings__v0""#
        );
    }
}
