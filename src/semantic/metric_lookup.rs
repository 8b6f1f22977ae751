//! Transitive metric dependencies.

use std::collections::BTreeSet;

use super::error::{SemanticError, SemanticResult};
use super::index::SemanticModelIndex;
use crate::model::{MeasureOrMetric, Metric, MetricType};

/// Which measures of a metric count towards its linkable elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureScope {
    /// Every measure the metric reads.
    All,
    /// For conversion metrics only the base side.
    GroupableOnly,
}

/// Names of the measures a metric depends on, in first-seen order.
pub fn measures_for_metric(
    index: &SemanticModelIndex,
    metric_name: &str,
    scope: MeasureScope,
) -> SemanticResult<Vec<String>> {
    let mut measures = Vec::new();
    let mut stack = Vec::new();
    collect_measures(index, metric_name, scope, &mut stack, &mut measures)?;
    Ok(measures)
}

fn collect_measures(
    index: &SemanticModelIndex,
    metric_name: &str,
    scope: MeasureScope,
    stack: &mut Vec<String>,
    out: &mut Vec<String>,
) -> SemanticResult<()> {
    if stack.iter().any(|m| m == metric_name) {
        let mut cycle = stack.clone();
        cycle.push(metric_name.to_string());
        return Err(SemanticError::CyclicDependency(cycle));
    }
    let metric = index.get_metric(metric_name)?;
    stack.push(metric_name.to_string());

    let push = |name: &str, out: &mut Vec<String>| {
        if !out.iter().any(|m| m == name) {
            out.push(name.to_string());
        }
    };

    match metric.metric_type {
        MetricType::Simple => {
            let measure = metric
                .type_params
                .measure
                .as_ref()
                .ok_or_else(|| invalid(metric, "simple metric has no measure"))?;
            push(&measure.name, out);
        }
        MetricType::Derived | MetricType::Ratio => {
            for input in metric.input_metrics() {
                collect_measures(index, &input.name, scope, stack, out)?;
            }
        }
        MetricType::Cumulative => match metric.cumulative_input() {
            Some(MeasureOrMetric::Measure(m)) => push(&m.name, out),
            Some(MeasureOrMetric::Metric(m)) => collect_measures(index, &m.name, scope, stack, out)?,
            None => return Err(invalid(metric, "cumulative metric has no input")),
        },
        MetricType::Conversion => {
            let mut sides = vec![metric.conversion_base_input()];
            if scope == MeasureScope::All {
                sides.push(metric.conversion_input());
            }
            for side in sides {
                match side {
                    Some(MeasureOrMetric::Measure(m)) => push(&m.name, out),
                    Some(MeasureOrMetric::Metric(m)) => {
                        collect_measures(index, &m.name, scope, stack, out)?
                    }
                    None => return Err(invalid(metric, "conversion metric input is missing")),
                }
            }
        }
    }

    stack.pop();
    Ok(())
}

/// Names of every metric `metric_name` depends on, including itself.
pub fn metric_closure(index: &SemanticModelIndex, metric_name: &str) -> SemanticResult<BTreeSet<String>> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![metric_name.to_string()];
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let metric = index.get_metric(&name)?;
        pending.extend(metric.input_metrics().into_iter().map(|i| i.name.clone()));
    }
    Ok(seen)
}

fn invalid(metric: &Metric, message: &str) -> SemanticError {
    SemanticError::InvalidMetric {
        metric: metric.name.clone(),
        message: message.to_string(),
    }
}
