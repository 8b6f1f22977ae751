//! Query resolution: names in a request become path keys.

use std::collections::BTreeSet;

use serde::Serialize;

use super::filter::{ResolvedFilter, WhereFilterSpec};
use super::names::resolve_element_name;
use super::request::{OutputTarget, QueryRequest, TimeConstraint};
use crate::semantic::{
    ElementPathKey, LinkableElementFilter, LinkableElementResolver, LinkableElementSet,
    LinkableElementType, SemanticError, SemanticModelIndex, SemanticResult,
};

/// An output column to sort by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderByItem {
    pub column_name: String,
    pub descending: bool,
}

/// A request with every name resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub metrics: Vec<String>,
    pub group_by: Vec<ElementPathKey>,
    pub where_filters: Vec<ResolvedFilter>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub time_constraint: Option<TimeConstraint>,
    pub output: OutputTarget,
    /// Elements the requested metrics can be grouped by.
    pub linkable_elements: LinkableElementSet,
}

impl ResolvedQuery {
    pub fn is_distinct_values(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Output column names, group-by items first.
    pub fn output_columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .map(|k| k.qualified_name())
            .chain(self.metrics.iter().cloned())
            .collect()
    }
}

pub fn resolve_query(
    index: &SemanticModelIndex,
    resolver: &LinkableElementResolver<'_>,
    request: &QueryRequest,
) -> SemanticResult<ResolvedQuery> {
    let mut metrics: Vec<String> = Vec::new();
    for name in &request.metrics {
        index.get_metric(name)?;
        if metrics.contains(name) {
            return Err(SemanticError::UnsupportedQuery(format!(
                "metric '{}' is requested more than once",
                name
            )));
        }
        metrics.push(name.clone());
    }

    if metrics.is_empty() {
        if request.group_by.is_empty() {
            return Err(SemanticError::UnsupportedQuery(
                "a query needs at least one metric or group-by item".to_string(),
            ));
        }
        if request.time_constraint.is_some() {
            return Err(SemanticError::UnsupportedQuery(
                "time constraints need at least one metric".to_string(),
            ));
        }
    }

    let metric_refs: Vec<&str> = metrics.iter().map(String::as_str).collect();
    let linkable_elements =
        resolver.linkable_elements_for_metrics(&metric_refs, &LinkableElementFilter::default())?;

    let mut group_by: Vec<ElementPathKey> = Vec::new();
    for name in &request.group_by {
        let key = resolve_element_name(name, &linkable_elements)?.ok_or_else(|| {
            SemanticError::UnknownGroupBy {
                name: name.clone(),
                metrics: metrics.clone(),
            }
        })?;
        match key.element_type {
            LinkableElementType::Metric => {
                return Err(SemanticError::UnsupportedQuery(format!(
                    "grouping by metric '{}' is not supported",
                    name
                )))
            }
            LinkableElementType::Dimension
            | LinkableElementType::TimeDimension
            | LinkableElementType::Entity => {}
        }
        if !group_by.contains(&key) {
            group_by.push(key);
        }
    }
    let output_names: BTreeSet<String> = group_by.iter().map(|k| k.qualified_name()).collect();
    if output_names.len() != group_by.len() {
        return Err(SemanticError::UnsupportedQuery(
            "group-by items resolve to the same output column".to_string(),
        ));
    }

    let where_filters = request
        .where_filters
        .iter()
        .map(|template| WhereFilterSpec::parse(template).resolve(&linkable_elements))
        .collect::<SemanticResult<Vec<_>>>()?;

    let mut order_by = Vec::new();
    for item in &request.order_by {
        let (descending, name) = match item.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, item.as_str()),
        };
        let column_name = if metrics.iter().any(|m| m == name) {
            name.to_string()
        } else {
            resolve_element_name(name, &linkable_elements)
                .ok()
                .flatten()
                .filter(|k| group_by.contains(k))
                .map(|k| k.qualified_name())
                .ok_or_else(|| SemanticError::UnknownOrderBy(name.to_string()))?
        };
        order_by.push(OrderByItem {
            column_name,
            descending,
        });
    }

    Ok(ResolvedQuery {
        metrics,
        group_by,
        where_filters,
        order_by,
        limit: request.limit,
        time_constraint: request.time_constraint.clone(),
        output: request.output.clone(),
        linkable_elements,
    })
}
