//! Execution plans: a DAG of tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use super::error::{ExecutionPlanError, ExecutionPlanResult};
use super::task::{
    ExecutionPlanTask, SelectSqlQueryToDataTableTask, SelectSqlQueryToTableTask, TaskId,
};
use crate::dataflow::{DataflowPlan, DataflowToSqlRenderer, RenderedSql};
use crate::planner::PlannerResult;
use crate::sql::Dialect;

/// Tasks and their dependencies. Edges run parent to child.
#[derive(Default, Clone)]
pub struct ExecutionPlan {
    graph: DiGraph<Arc<dyn ExecutionPlanTask>, ()>,
    nodes: HashMap<TaskId, NodeIndex>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan with a single task.
    pub fn single(task: Arc<dyn ExecutionPlanTask>) -> Self {
        let mut plan = Self::new();
        let index = plan.graph.add_node(task.clone());
        plan.nodes.insert(task.task_id(), index);
        plan
    }

    /// Add a task that runs after every task in `parents`.
    pub fn add_task(
        &mut self,
        task: Arc<dyn ExecutionPlanTask>,
        parents: &[TaskId],
    ) -> ExecutionPlanResult<TaskId> {
        let id = task.task_id();
        if self.nodes.contains_key(&id) {
            return Err(ExecutionPlanError::DuplicateTask(id));
        }
        let mut parent_nodes = Vec::with_capacity(parents.len());
        for parent in parents {
            let node = self
                .nodes
                .get(parent)
                .copied()
                .ok_or(ExecutionPlanError::UnknownParent {
                    task: id,
                    parent: *parent,
                })?;
            parent_nodes.push(node);
        }
        let index = self.graph.add_node(task);
        for parent in parent_nodes {
            self.graph.update_edge(parent, index, ());
        }
        self.nodes.insert(id, index);
        Ok(id)
    }

    /// Make `child` wait for `parent`.
    pub fn add_dependency(&mut self, parent: TaskId, child: TaskId) -> ExecutionPlanResult<()> {
        let lookup = |id: TaskId| {
            self.nodes
                .get(&id)
                .copied()
                .ok_or(ExecutionPlanError::UnknownParent {
                    task: child,
                    parent: id,
                })
        };
        let (parent_node, child_node) = (lookup(parent)?, lookup(child)?);
        if parent_node == child_node || has_path_connecting(&self.graph, child_node, parent_node, None) {
            return Err(ExecutionPlanError::Cycle(child));
        }
        self.graph.update_edge(parent_node, child_node, ());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn task(&self, id: TaskId) -> Option<&Arc<dyn ExecutionPlanTask>> {
        self.nodes.get(&id).map(|index| &self.graph[*index])
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<dyn ExecutionPlanTask>> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    pub fn parents(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn children(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(index) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut ids: Vec<TaskId> = self
            .graph
            .neighbors_directed(*index, direction)
            .map(|n| self.graph[n].task_id())
            .collect();
        ids.sort();
        ids
    }

    /// Tasks grouped so every task's parents are in earlier waves.
    pub fn waves(&self) -> ExecutionPlanResult<Vec<Vec<TaskId>>> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| ExecutionPlanError::Cycle(self.graph[cycle.node_id()].task_id()))?;
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<TaskId>> = Vec::new();
        for index in order {
            let level = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|parent| depth.get(&parent).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(index, level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(self.graph[index].task_id());
        }
        Ok(waves)
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tasks()).finish()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Execution plan:")?;
        for task in self.tasks() {
            write!(f, "  {} {}", task.task_id(), task.description())?;
            let parents = self.parents(task.task_id());
            if !parents.is_empty() {
                let parents: Vec<String> = parents.iter().map(|p| p.to_string()).collect();
                write!(f, " <- {}", parents.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Turns a finished dataflow plan into the single task that runs it.
#[derive(Debug, Clone, Copy)]
pub struct DataflowToExecutionPlanConverter {
    renderer: DataflowToSqlRenderer,
}

impl DataflowToExecutionPlanConverter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            renderer: DataflowToSqlRenderer::new(dialect),
        }
    }

    pub fn convert(&self, plan: &DataflowPlan) -> PlannerResult<ExecutionPlan> {
        let rendered = self.renderer.render(plan)?;
        Ok(Self::from_rendered(rendered))
    }

    /// Dispatches on where the rendered SQL writes its result.
    pub fn from_rendered(rendered: RenderedSql) -> ExecutionPlan {
        let RenderedSql {
            sql,
            bind_parameters,
            output_table,
            ..
        } = rendered;
        let task: Arc<dyn ExecutionPlanTask> = match output_table {
            Some(table) => Arc::new(SelectSqlQueryToTableTask::new(sql, bind_parameters, table)),
            None => Arc::new(SelectSqlQueryToDataTableTask::new(sql, bind_parameters)),
        };
        debug!(task = %task.task_id(), kind = %task.description(), "converted dataflow plan");
        ExecutionPlan::single(task)
    }
}
