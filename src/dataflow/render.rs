//! Dataflow plan to SQL.
//!
//! CTE nodes are rendered into the WITH clause in id order, which is also
//! dependency order. Any other node is inlined as a subquery where its
//! consumer reads it.

use serde::Serialize;

use super::{DataflowNode, DataflowNodeId, DataflowPlan};
use crate::planner::{PlannerError, PlannerResult};
use crate::sql::expr::{aggregate, and_all, coalesce, col_ref, column, eq};
use crate::sql::{
    Cte, Dialect, JoinType, OrderByExpr, Query, SelectColumn, SqlBindParameters, SqlExpr,
    SqlFunction, TableRef, TableSource,
};

/// SQL for a dataflow plan, ready for a [`crate::execution::SqlClient`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedSql {
    pub sql: String,
    #[serde(skip)]
    pub bind_parameters: SqlBindParameters,
    pub output_columns: Vec<String>,
    /// Set when the plan writes to a table instead of returning rows.
    pub output_table: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DataflowToSqlRenderer {
    dialect: Dialect,
}

impl DataflowToSqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn render(&self, plan: &DataflowPlan) -> PlannerResult<RenderedSql> {
        let sink = plan.sink_node().ok_or_else(|| {
            PlannerError::InvariantViolation(format!("sink {} is not in the plan", plan.sink()))
        })?;
        let (parent, output_table) = match sink {
            DataflowNode::WriteToResultDataTable { parent } => (*parent, None),
            DataflowNode::WriteToResultTable { parent, table_name } => {
                (*parent, Some(table_name.clone()))
            }
            other => return Err(PlannerError::UnhandledNodeKind(other.kind().to_string())),
        };

        let mut query = self.node_query(plan, parent)?;
        for (id, name) in plan.ctes() {
            query.with.push(Cte::new(name.clone(), self.node_query(plan, *id)?));
        }

        let mut bind_parameters = SqlBindParameters::new();
        for node in plan.nodes() {
            for expr in node_exprs(node) {
                collect_bind_parameters(expr, &mut bind_parameters);
            }
        }

        let select = query.to_sql(self.dialect);
        let sql = match &output_table {
            Some(table) => format!(
                "CREATE TABLE {} AS (\n{}\n)",
                TableRef::from_dotted(table).to_tokens().serialize(self.dialect),
                select
            ),
            None => select,
        };
        let output_columns = plan
            .node(parent)
            .map(DataflowNode::output_columns)
            .unwrap_or_default();

        Ok(RenderedSql {
            sql,
            bind_parameters,
            output_columns,
            output_table,
        })
    }

    /// A CTE reference, or the node's query inlined.
    fn source(&self, plan: &DataflowPlan, id: DataflowNodeId) -> PlannerResult<TableSource> {
        match plan.cte_name(id) {
            Some(name) => Ok(TableSource::Cte(name.to_string())),
            None => Ok(TableSource::Subquery(Box::new(self.node_query(plan, id)?))),
        }
    }

    fn node_query(&self, plan: &DataflowPlan, id: DataflowNodeId) -> PlannerResult<Query> {
        let node = plan.node(id).ok_or_else(|| {
            PlannerError::InvariantViolation(format!("node {} is not in the plan", id))
        })?;

        let query = match node {
            DataflowNode::ReadSqlSource(read) => Query::new()
                .select(read.columns.clone())
                .from(
                    TableSource::Table(TableRef::from_dotted(&read.relation)),
                    read.source_name.clone(),
                ),
            DataflowNode::JoinOnEntities(join) => {
                let mut query = Query::new()
                    .select(join.columns.clone())
                    .from(self.source(plan, join.left)?, join.left_alias.clone());
                for right in &join.joins {
                    query = query.join(
                        right.join_type,
                        self.source(plan, right.node)?,
                        right.alias.clone(),
                        right.on.clone(),
                    );
                }
                query
            }
            DataflowNode::JoinToTimeSpine(join) => Query::new()
                .select(join.columns.clone())
                .from(self.source(plan, join.spine)?, join.spine_alias.clone())
                .join(
                    JoinType::Inner,
                    self.source(plan, join.parent)?,
                    join.parent_alias.clone(),
                    Some(join.on.clone()),
                ),
            DataflowNode::WhereConstraint(filter) => Query::new()
                .select(select_columns(&filter.columns))
                .from(self.source(plan, filter.parent)?, "w")
                .filter(filter.condition.clone()),
            DataflowNode::MatchConversionEvents(matched) => Query::new()
                .select(matched.columns.clone())
                .distinct()
                .from(
                    self.source(plan, matched.conversion)?,
                    matched.conversion_alias.clone(),
                )
                .join(
                    JoinType::Inner,
                    self.source(plan, matched.base)?,
                    matched.base_alias.clone(),
                    Some(matched.on.clone()),
                ),
            DataflowNode::AggregateMeasures(agg) => {
                let mut columns = select_columns(&agg.group_by);
                columns.extend(agg.aggregates.iter().cloned());
                Query::new()
                    .select(columns)
                    .from(self.source(plan, agg.parent)?, "a")
                    .group_by(agg.group_by.iter().map(|g| column(g)).collect())
            }
            DataflowNode::ProjectColumns(project) => {
                let query = Query::new()
                    .select(project.columns.clone())
                    .from(self.source(plan, project.parent)?, "p");
                if project.distinct {
                    query.distinct()
                } else {
                    query
                }
            }
            DataflowNode::CombineAggregatedOutputs(combine) => {
                self.combine_query(plan, &combine.parents, &combine.group_by, &combine.value_columns)?
            }
            DataflowNode::ComputeMetrics(compute) => {
                let mut columns = select_columns(&compute.group_by);
                columns.extend(compute.columns.iter().cloned());
                Query::new()
                    .select(columns)
                    .from(self.source(plan, compute.parent)?, "m")
            }
            DataflowNode::OrderByLimit(order) => {
                let mut query = Query::new()
                    .select(select_columns(&order.columns))
                    .from(self.source(plan, order.parent)?, "o")
                    .order_by(
                        order
                            .order_by
                            .iter()
                            .map(|(name, descending)| match *descending {
                                true => OrderByExpr::desc(column(name)),
                                false => OrderByExpr::asc(column(name)),
                            })
                            .collect(),
                    );
                if let Some(limit) = order.limit {
                    query = query.limit(limit);
                }
                query
            }
            DataflowNode::WriteToResultDataTable { .. } | DataflowNode::WriteToResultTable { .. } => {
                return Err(PlannerError::UnhandledNodeKind(format!(
                    "{} read as a source",
                    node.kind()
                )))
            }
        };
        Ok(query)
    }

    /// Full outer joins on the group-by columns. Later inputs match on the
    /// coalesced columns of every earlier input, so a row missing from one
    /// input still lines up with the others.
    fn combine_query(
        &self,
        plan: &DataflowPlan,
        parents: &[(DataflowNodeId, String)],
        group_by: &[String],
        value_columns: &[(String, String)],
    ) -> PlannerResult<Query> {
        let Some(((first, first_alias), rest)) = parents.split_first() else {
            return Err(PlannerError::InvariantViolation(
                "combining zero inputs".to_string(),
            ));
        };
        let mut query = Query::new().from(self.source(plan, *first)?, first_alias.clone());
        let mut seen: Vec<&str> = vec![first_alias.as_str()];
        for (parent, alias) in rest {
            let (join_type, on) = if group_by.is_empty() {
                (JoinType::Cross, None)
            } else {
                let conditions = group_by
                    .iter()
                    .map(|g| eq(coalesced(&seen, g), col_ref(alias, g)))
                    .collect();
                (JoinType::FullOuter, Some(and_all(conditions)))
            };
            query = query.join(join_type, self.source(plan, *parent)?, alias.clone(), on);
            seen.push(alias.as_str());
        }

        let group_exprs: Vec<SqlExpr> = group_by.iter().map(|g| coalesced(&seen, g)).collect();
        let mut columns: Vec<SelectColumn> = group_by
            .iter()
            .zip(&group_exprs)
            .map(|(g, expr)| SelectColumn::new(expr.clone(), g.clone()))
            .collect();
        for (name, alias) in value_columns {
            columns.push(SelectColumn::new(
                aggregate(SqlFunction::Max, col_ref(alias, name)),
                name.clone(),
            ));
        }
        Ok(query.select(columns).group_by(group_exprs))
    }
}

fn select_columns(names: &[String]) -> Vec<SelectColumn> {
    names
        .iter()
        .map(|name| SelectColumn::new(column(name), name.clone()))
        .collect()
}

fn coalesced(aliases: &[&str], name: &str) -> SqlExpr {
    match aliases {
        [only] => col_ref(only, name),
        _ => coalesce(aliases.iter().map(|alias| col_ref(alias, name)).collect()),
    }
}

fn columns(columns: &[SelectColumn]) -> Vec<&SqlExpr> {
    columns.iter().map(|c| &c.expr).collect()
}

fn node_exprs(node: &DataflowNode) -> Vec<&SqlExpr> {
    match node {
        DataflowNode::ReadSqlSource(n) => columns(&n.columns),
        DataflowNode::JoinOnEntities(n) => {
            let mut exprs = columns(&n.columns);
            exprs.extend(n.joins.iter().filter_map(|j| j.on.as_ref()));
            exprs
        }
        DataflowNode::JoinToTimeSpine(n) => {
            let mut exprs = columns(&n.columns);
            exprs.push(&n.on);
            exprs
        }
        DataflowNode::WhereConstraint(n) => vec![&n.condition],
        DataflowNode::MatchConversionEvents(n) => {
            let mut exprs = columns(&n.columns);
            exprs.push(&n.on);
            exprs
        }
        DataflowNode::AggregateMeasures(n) => columns(&n.aggregates),
        DataflowNode::ProjectColumns(n) => columns(&n.columns),
        DataflowNode::ComputeMetrics(n) => columns(&n.columns),
        DataflowNode::CombineAggregatedOutputs(_)
        | DataflowNode::OrderByLimit(_)
        | DataflowNode::WriteToResultDataTable { .. }
        | DataflowNode::WriteToResultTable { .. } => Vec::new(),
    }
}

fn collect_bind_parameters(expr: &SqlExpr, into: &mut SqlBindParameters) {
    if let SqlExpr::String(s) = expr {
        if !s.bind_parameters.is_empty() {
            *into = into.combine(&s.bind_parameters);
        }
    }
    for child in expr.children() {
        collect_bind_parameters(child, into);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::{
        AggregateMeasuresNode, CombineAggregatedOutputsNode, DataflowPlanArena, OrderByLimitNode,
        ReadSqlSourceNode,
    };
    use crate::sql::syntax::check_statements;

    fn read(arena: &mut DataflowPlanArena, model: &str, table: &str) -> DataflowNodeId {
        arena.add(DataflowNode::ReadSqlSource(ReadSqlSourceNode {
            source_name: model.into(),
            relation: table.into(),
            columns: vec![
                SelectColumn::new(column("ds"), "metric_time__day"),
                SelectColumn::new(column("amount"), "amount"),
            ],
        }))
    }

    fn aggregate_node(arena: &mut DataflowPlanArena, parent: DataflowNodeId, name: &str) -> DataflowNodeId {
        arena.add_cte(
            DataflowNode::AggregateMeasures(AggregateMeasuresNode {
                parent,
                group_by: vec!["metric_time__day".into()],
                aggregates: vec![SelectColumn::new(
                    aggregate(SqlFunction::Sum, column("amount")),
                    name,
                )],
            }),
            format!("base_{}", name),
        )
    }

    fn sink(arena: &mut DataflowPlanArena, parent: DataflowNodeId, columns: &[&str]) -> DataflowNodeId {
        let ordered = arena.add(DataflowNode::OrderByLimit(OrderByLimitNode {
            parent,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            order_by: vec![("metric_time__day".into(), true)],
            limit: Some(10),
        }));
        arena.add(DataflowNode::WriteToResultDataTable { parent: ordered })
    }

    #[test]
    fn test_render_single_aggregate() {
        let mut arena = DataflowPlanArena::default();
        let source = read(&mut arena, "orders", "main.orders");
        let agg = aggregate_node(&mut arena, source, "revenue");
        let sink = sink(&mut arena, agg, &["metric_time__day", "revenue"]);
        let plan = arena.finish(sink);

        let rendered = DataflowToSqlRenderer::new(Dialect::DuckDb).render(&plan).unwrap();
        assert!(rendered.sql.starts_with("WITH"), "{}", rendered.sql);
        assert!(rendered.sql.contains("GROUP BY"));
        assert!(rendered.sql.contains("LIMIT 10"));
        assert_eq!(rendered.output_columns, vec!["metric_time__day", "revenue"]);
        assert!(rendered.output_table.is_none());
        check_statements(&rendered.sql, Dialect::DuckDb).unwrap();
    }

    #[test]
    fn test_render_combine_uses_full_outer_join() {
        let mut arena = DataflowPlanArena::default();
        let orders = read(&mut arena, "orders", "main.orders");
        let revenue = aggregate_node(&mut arena, orders, "revenue");
        let refunds_source = read(&mut arena, "refunds", "main.refunds");
        let refunds = aggregate_node(&mut arena, refunds_source, "refunds");
        let combined = arena.add(DataflowNode::CombineAggregatedOutputs(
            CombineAggregatedOutputsNode {
                parents: vec![(revenue, "i0".into()), (refunds, "i1".into())],
                group_by: vec!["metric_time__day".into()],
                value_columns: vec![
                    ("revenue".into(), "i0".into()),
                    ("refunds".into(), "i1".into()),
                ],
            },
        ));
        let sink = sink(&mut arena, combined, &["metric_time__day", "revenue", "refunds"]);
        let plan = arena.finish(sink);

        for dialect in [Dialect::DuckDb, Dialect::Postgres, Dialect::Snowflake] {
            let rendered = DataflowToSqlRenderer::new(dialect).render(&plan).unwrap();
            assert!(rendered.sql.contains("FULL OUTER JOIN"), "{}", rendered.sql);
            assert!(rendered.sql.contains("MAX("), "{}", rendered.sql);
            check_statements(&rendered.sql, dialect).unwrap();
        }
    }

    #[test]
    fn test_render_create_table() {
        let mut arena = DataflowPlanArena::default();
        let source = read(&mut arena, "orders", "main.orders");
        let agg = aggregate_node(&mut arena, source, "revenue");
        let ordered = arena.add(DataflowNode::OrderByLimit(OrderByLimitNode {
            parent: agg,
            columns: vec!["metric_time__day".into(), "revenue".into()],
            order_by: Vec::new(),
            limit: None,
        }));
        let sink = arena.add(DataflowNode::WriteToResultTable {
            parent: ordered,
            table_name: "analytics.daily_revenue".into(),
        });
        let plan = arena.finish(sink);

        let rendered = DataflowToSqlRenderer::new(Dialect::Postgres).render(&plan).unwrap();
        assert!(
            rendered
                .sql
                .starts_with(r#"CREATE TABLE "analytics"."daily_revenue" AS ("#),
            "{}",
            rendered.sql
        );
        assert_eq!(rendered.output_table.as_deref(), Some("analytics.daily_revenue"));
        check_statements(&rendered.sql, Dialect::Postgres).unwrap();
    }

    #[test]
    fn test_render_rejects_non_sink() {
        let mut arena = DataflowPlanArena::default();
        let source = read(&mut arena, "orders", "main.orders");
        let plan = arena.finish(source);
        let err = DataflowToSqlRenderer::new(Dialect::DuckDb).render(&plan).unwrap_err();
        assert!(matches!(err, PlannerError::UnhandledNodeKind(kind) if kind == "ReadSqlSource"));
    }
}
