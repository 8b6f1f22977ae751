//! Dataflow plans: the SQL-shaped form of an evaluation plan.
//!
//! Each node becomes one SELECT. Nodes reference their parents by id, so a
//! plan is an arena where a parent always has a smaller id than its
//! consumers. Nodes registered as CTEs are rendered once in the WITH clause
//! and referenced by name; every other node is inlined as a subquery.
//!
//! ```text
//! ReadSqlSource ─┐
//! ReadSqlSource ─┴► JoinOnEntities ─► [JoinToTimeSpine] ─► WhereConstraint ─► AggregateMeasures (CTE)
//!                                                                                  │
//!                      CombineAggregatedOutputs ◄──────────────────────────────────┘
//!                              │
//!                              ▼
//!                      ComputeMetrics (CTE) ─► OrderByLimit ─► WriteToResult*
//! ```

pub mod builder;
pub mod render;

pub use builder::{DataflowPlanBuilder, METRIC_TIME_COLUMN};
pub use render::{DataflowToSqlRenderer, RenderedSql};

use std::collections::BTreeMap;
use std::fmt;

use crate::sql::{JoinType, SelectColumn, SqlExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataflowNodeId(pub usize);

impl fmt::Display for DataflowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Reads the columns of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSqlSourceNode {
    /// Semantic model (or time spine) the table backs.
    pub source_name: String,
    pub relation: String,
    pub columns: Vec<SelectColumn>,
}

/// A parent joined into a node under an alias.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeJoin {
    pub join_type: JoinType,
    pub node: DataflowNodeId,
    pub alias: String,
    pub on: Option<SqlExpr>,
}

/// Joins semantic models along entity paths and projects the element
/// columns a base query needs.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOnEntitiesNode {
    pub left: DataflowNodeId,
    pub left_alias: String,
    pub joins: Vec<NodeJoin>,
    pub columns: Vec<SelectColumn>,
}

/// Re-keys rows by a time spine: offsets and cumulative windows.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinToTimeSpineNode {
    pub spine: DataflowNodeId,
    pub spine_alias: String,
    pub parent: DataflowNodeId,
    pub parent_alias: String,
    pub on: SqlExpr,
    pub columns: Vec<SelectColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereConstraintNode {
    pub parent: DataflowNodeId,
    pub condition: SqlExpr,
    /// Columns carried through unchanged.
    pub columns: Vec<String>,
}

/// Pairs each conversion event with the latest preceding base event.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConversionEventsNode {
    pub conversion: DataflowNodeId,
    pub conversion_alias: String,
    pub base: DataflowNodeId,
    pub base_alias: String,
    pub on: SqlExpr,
    pub columns: Vec<SelectColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateMeasuresNode {
    pub parent: DataflowNodeId,
    pub group_by: Vec<String>,
    pub aggregates: Vec<SelectColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectColumnsNode {
    pub parent: DataflowNodeId,
    pub columns: Vec<SelectColumn>,
    pub distinct: bool,
}

/// Joins aggregated outputs on their shared group-by columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CombineAggregatedOutputsNode {
    /// Inputs with the aliases they are joined under.
    pub parents: Vec<(DataflowNodeId, String)>,
    pub group_by: Vec<String>,
    /// Value columns and the alias of the input providing each.
    pub value_columns: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeMetricsNode {
    pub parent: DataflowNodeId,
    pub group_by: Vec<String>,
    pub columns: Vec<SelectColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByLimitNode {
    pub parent: DataflowNodeId,
    pub columns: Vec<String>,
    /// Output column and whether it sorts descending.
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataflowNode {
    ReadSqlSource(ReadSqlSourceNode),
    JoinOnEntities(JoinOnEntitiesNode),
    JoinToTimeSpine(JoinToTimeSpineNode),
    WhereConstraint(WhereConstraintNode),
    MatchConversionEvents(MatchConversionEventsNode),
    AggregateMeasures(AggregateMeasuresNode),
    ProjectColumns(ProjectColumnsNode),
    CombineAggregatedOutputs(CombineAggregatedOutputsNode),
    ComputeMetrics(ComputeMetricsNode),
    OrderByLimit(OrderByLimitNode),
    WriteToResultDataTable { parent: DataflowNodeId },
    WriteToResultTable { parent: DataflowNodeId, table_name: String },
}

impl DataflowNode {
    pub fn kind(&self) -> &'static str {
        match self {
            DataflowNode::ReadSqlSource(_) => "ReadSqlSource",
            DataflowNode::JoinOnEntities(_) => "JoinOnEntities",
            DataflowNode::JoinToTimeSpine(_) => "JoinToTimeSpine",
            DataflowNode::WhereConstraint(_) => "WhereConstraint",
            DataflowNode::MatchConversionEvents(_) => "MatchConversionEvents",
            DataflowNode::AggregateMeasures(_) => "AggregateMeasures",
            DataflowNode::ProjectColumns(_) => "ProjectColumns",
            DataflowNode::CombineAggregatedOutputs(_) => "CombineAggregatedOutputs",
            DataflowNode::ComputeMetrics(_) => "ComputeMetrics",
            DataflowNode::OrderByLimit(_) => "OrderByLimit",
            DataflowNode::WriteToResultDataTable { .. } => "WriteToResultDataTable",
            DataflowNode::WriteToResultTable { .. } => "WriteToResultTable",
        }
    }

    pub fn parents(&self) -> Vec<DataflowNodeId> {
        match self {
            DataflowNode::ReadSqlSource(_) => vec![],
            DataflowNode::JoinOnEntities(n) => std::iter::once(n.left)
                .chain(n.joins.iter().map(|j| j.node))
                .collect(),
            DataflowNode::JoinToTimeSpine(n) => vec![n.spine, n.parent],
            DataflowNode::WhereConstraint(n) => vec![n.parent],
            DataflowNode::MatchConversionEvents(n) => vec![n.conversion, n.base],
            DataflowNode::AggregateMeasures(n) => vec![n.parent],
            DataflowNode::ProjectColumns(n) => vec![n.parent],
            DataflowNode::CombineAggregatedOutputs(n) => n.parents.iter().map(|(id, _)| *id).collect(),
            DataflowNode::ComputeMetrics(n) => vec![n.parent],
            DataflowNode::OrderByLimit(n) => vec![n.parent],
            DataflowNode::WriteToResultDataTable { parent }
            | DataflowNode::WriteToResultTable { parent, .. } => vec![*parent],
        }
    }

    /// Names of the columns this node outputs.
    pub fn output_columns(&self) -> Vec<String> {
        fn aliases(columns: &[SelectColumn]) -> Vec<String> {
            columns.iter().map(|c| c.alias.clone()).collect()
        }
        match self {
            DataflowNode::ReadSqlSource(n) => aliases(&n.columns),
            DataflowNode::JoinOnEntities(n) => aliases(&n.columns),
            DataflowNode::JoinToTimeSpine(n) => aliases(&n.columns),
            DataflowNode::WhereConstraint(n) => n.columns.clone(),
            DataflowNode::MatchConversionEvents(n) => aliases(&n.columns),
            DataflowNode::AggregateMeasures(n) => n
                .group_by
                .iter()
                .cloned()
                .chain(aliases(&n.aggregates))
                .collect(),
            DataflowNode::ProjectColumns(n) => aliases(&n.columns),
            DataflowNode::CombineAggregatedOutputs(n) => n
                .group_by
                .iter()
                .cloned()
                .chain(n.value_columns.iter().map(|(c, _)| c.clone()))
                .collect(),
            DataflowNode::ComputeMetrics(n) => n
                .group_by
                .iter()
                .cloned()
                .chain(aliases(&n.columns))
                .collect(),
            DataflowNode::OrderByLimit(n) => n.columns.clone(),
            DataflowNode::WriteToResultDataTable { .. } | DataflowNode::WriteToResultTable { .. } => {
                vec![]
            }
        }
    }
}

/// Arena of dataflow nodes ending in one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DataflowPlan {
    nodes: Vec<DataflowNode>,
    ctes: BTreeMap<DataflowNodeId, String>,
    sink: DataflowNodeId,
}

impl DataflowPlan {
    pub fn nodes(&self) -> &[DataflowNode] {
        &self.nodes
    }

    pub fn node(&self, id: DataflowNodeId) -> Option<&DataflowNode> {
        self.nodes.get(id.0)
    }

    pub fn sink(&self) -> DataflowNodeId {
        self.sink
    }

    pub fn sink_node(&self) -> Option<&DataflowNode> {
        self.node(self.sink)
    }

    /// CTE names by node, in node order.
    pub fn ctes(&self) -> &BTreeMap<DataflowNodeId, String> {
        &self.ctes
    }

    pub fn cte_name(&self, id: DataflowNodeId) -> Option<&str> {
        self.ctes.get(&id).map(String::as_str)
    }
}

impl fmt::Display for DataflowPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataflow plan:")?;
        for (i, node) in self.nodes.iter().enumerate() {
            let id = DataflowNodeId(i);
            let parents: Vec<String> = node.parents().iter().map(|p| p.to_string()).collect();
            write!(f, "  {} {}", id, node.kind())?;
            if let Some(cte) = self.cte_name(id) {
                write!(f, " as {}", cte)?;
            }
            if !parents.is_empty() {
                write!(f, " <- {}", parents.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Appends nodes, handing out ids.
#[derive(Debug, Default)]
pub(crate) struct DataflowPlanArena {
    nodes: Vec<DataflowNode>,
    ctes: BTreeMap<DataflowNodeId, String>,
}

impl DataflowPlanArena {
    pub(crate) fn add(&mut self, node: DataflowNode) -> DataflowNodeId {
        self.nodes.push(node);
        DataflowNodeId(self.nodes.len() - 1)
    }

    pub(crate) fn add_cte(&mut self, node: DataflowNode, name: impl Into<String>) -> DataflowNodeId {
        let id = self.add(node);
        self.ctes.insert(id, name.into());
        id
    }

    pub(crate) fn node(&self, id: DataflowNodeId) -> Option<&DataflowNode> {
        self.nodes.get(id.0)
    }

    pub(crate) fn finish(self, sink: DataflowNodeId) -> DataflowPlan {
        DataflowPlan {
            nodes: self.nodes,
            ctes: self.ctes,
            sink,
        }
    }
}
