//! Individual validation rules. Each appends issues and never stops early.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use super::{ValidationElement, ValidationIssue};
use crate::model::{
    AggregationType, DimensionType, Manifest, MeasureOrMetric, Metric, MetricType, SemanticModel,
    TimeGranularity,
};
use crate::sql::syntax::check_expression;

fn metric_element(metric: &Metric) -> ValidationElement {
    ValidationElement::Metric(metric.name.clone())
}

fn model_element(model: &SemanticModel) -> ValidationElement {
    ValidationElement::SemanticModel(model.name.clone())
}

pub(super) fn validate_unique_names(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    let mut models = BTreeSet::new();
    for model in &manifest.semantic_models {
        if !models.insert(model.name.as_str()) {
            issues.push(ValidationIssue::error(
                model_element(model),
                "semantic model name is defined more than once",
            ));
        }
    }

    let mut metrics = BTreeSet::new();
    for metric in &manifest.metrics {
        if !metrics.insert(metric.name.as_str()) {
            issues.push(ValidationIssue::error(
                metric_element(metric),
                "metric name is defined more than once",
            ));
        }
    }

    // Measures are looked up by name alone, so they are unique manifest-wide.
    let mut measures: BTreeMap<&str, &str> = BTreeMap::new();
    // An element name means the same kind of thing in every model.
    let mut element_kinds: BTreeMap<&str, (&'static str, &str)> = BTreeMap::new();

    for model in &manifest.semantic_models {
        let mut local = BTreeSet::new();
        let elements = model
            .entities
            .iter()
            .map(|e| (e.name.as_str(), "entity"))
            .chain(model.dimensions.iter().map(|d| (d.name.as_str(), "dimension")));
        for (name, kind) in elements {
            if !local.insert(name) {
                issues.push(ValidationIssue::error(
                    model_element(model),
                    format!("element name '{}' is used more than once", name),
                ));
            }
            match element_kinds.get(name) {
                Some((other_kind, other_model)) if *other_kind != kind => {
                    issues.push(ValidationIssue::error(
                        model_element(model),
                        format!(
                            "'{}' is a {} here but a {} in semantic model '{}'",
                            name, kind, other_kind, other_model
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    element_kinds.insert(name, (kind, model.name.as_str()));
                }
            }
        }

        for measure in &model.measures {
            if let Some(owner) = measures.insert(measure.name.as_str(), model.name.as_str()) {
                issues.push(ValidationIssue::error(
                    model_element(model),
                    format!(
                        "measure '{}' is also defined in semantic model '{}'",
                        measure.name, owner
                    ),
                ));
            }
        }
    }
}

pub(super) fn validate_semantic_models(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    for model in &manifest.semantic_models {
        for measure in &model.measures {
            let agg_time = match model.agg_time_dimension_for(measure) {
                None => {
                    issues.push(ValidationIssue::error(
                        model_element(model),
                        format!(
                            "measure '{}' has no agg_time_dimension and the model sets no default",
                            measure.name
                        ),
                    ));
                    None
                }
                Some(name) => match model.get_dimension(name) {
                    Some(dimension) if dimension.dimension_type == DimensionType::Time => {
                        dimension.time_granularity()
                    }
                    Some(_) => {
                        issues.push(ValidationIssue::error(
                            model_element(model),
                            format!(
                                "agg_time_dimension '{}' of measure '{}' is not a time dimension",
                                name, measure.name
                            ),
                        ));
                        None
                    }
                    None => {
                        issues.push(ValidationIssue::error(
                            model_element(model),
                            format!(
                                "agg_time_dimension '{}' of measure '{}' is not a dimension of this model",
                                name, measure.name
                            ),
                        ));
                        None
                    }
                },
            };

            if measure.agg == AggregationType::Percentile {
                let percentile = measure.agg_params.as_ref().and_then(|p| p.percentile);
                match percentile {
                    Some(p) if p > 0.0 && p < 1.0 => {}
                    Some(p) => issues.push(ValidationIssue::error(
                        model_element(model),
                        format!(
                            "percentile of measure '{}' must be between 0 and 1, got {}",
                            measure.name, p
                        ),
                    )),
                    None => issues.push(ValidationIssue::error(
                        model_element(model),
                        format!("percentile measure '{}' sets no percentile", measure.name),
                    )),
                }
            }

            let Some(nad) = &measure.non_additive_dimension else {
                continue;
            };
            match model.get_dimension(&nad.name) {
                Some(dimension) => match (dimension.time_granularity(), agg_time) {
                    (None, _) => issues.push(ValidationIssue::error(
                        model_element(model),
                        format!(
                            "non-additive dimension '{}' of measure '{}' is not a time dimension",
                            nad.name, measure.name
                        ),
                    )),
                    (Some(nad_granularity), Some(agg_granularity))
                        if nad_granularity != agg_granularity =>
                    {
                        issues.push(ValidationIssue::error(
                            model_element(model),
                            format!(
                                "non-additive dimension '{}' of measure '{}' has granularity {} but the agg_time_dimension has {}",
                                nad.name, measure.name, nad_granularity, agg_granularity
                            ),
                        ))
                    }
                    (Some(_), _) => {}
                },
                None => issues.push(ValidationIssue::error(
                    model_element(model),
                    format!(
                        "non-additive dimension '{}' of measure '{}' is not a dimension of this model",
                        nad.name, measure.name
                    ),
                )),
            }
            for entity in &nad.window_groupings {
                if model.get_entity(entity).is_none() {
                    issues.push(ValidationIssue::error(
                        model_element(model),
                        format!(
                            "window grouping '{}' of measure '{}' is not an entity of this model",
                            entity, measure.name
                        ),
                    ));
                }
            }
        }
    }
}

pub(super) fn validate_metric_params(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    for metric in &manifest.metrics {
        let params = &metric.type_params;
        let mut error = |message: String| issues.push(ValidationIssue::error(metric_element(metric), message));

        match metric.metric_type {
            MetricType::Simple => {
                if params.measure.is_none() {
                    error("simple metric needs a measure".to_string());
                }
            }
            MetricType::Ratio => {
                if params.numerator.is_none() || params.denominator.is_none() {
                    error("ratio metric needs a numerator and a denominator".to_string());
                }
            }
            MetricType::Derived => {
                match params.expr.as_deref() {
                    Some(expr) => {
                        if let Err(e) = check_expression(expr) {
                            error(format!("expr '{}' is not a valid SQL expression: {}", expr, e.message));
                        }
                    }
                    None => error("derived metric needs an expr".to_string()),
                }
                let inputs = params.metrics.as_deref().unwrap_or_default();
                if inputs.is_empty() {
                    error("derived metric needs at least one input metric".to_string());
                }
                let mut names = BTreeSet::new();
                for input in inputs {
                    if !names.insert(input.output_name()) {
                        error(format!(
                            "input name '{}' is used more than once; set an alias",
                            input.output_name()
                        ));
                    }
                }
            }
            MetricType::Cumulative => {
                let nested = params.cumulative_type_params.as_ref();
                let nested_window = nested.and_then(|c| c.window.as_ref());
                if let (Some(legacy), Some(nested)) = (params.window.as_ref(), nested_window) {
                    if legacy != nested {
                        error(format!(
                            "window '{}' conflicts with cumulative_type_params window '{}'",
                            legacy, nested
                        ));
                    }
                }
                let nested_grain = nested.and_then(|c| c.grain_to_date);
                if let (Some(legacy), Some(nested)) = (params.grain_to_date, nested_grain) {
                    if legacy != nested {
                        error(format!(
                            "grain_to_date '{}' conflicts with cumulative_type_params grain_to_date '{}'",
                            legacy, nested
                        ));
                    }
                }
                if metric.cumulative_window().is_some() && metric.cumulative_grain_to_date().is_some() {
                    error("cumulative metric cannot set both a window and grain_to_date".to_string());
                }
                let nested_metric = nested.and_then(|c| c.metric.as_ref());
                check_input_slot(metric, "input", params.measure.is_some(), nested_metric.is_some(), issues);
            }
            MetricType::Conversion => match &params.conversion_type_params {
                None => error("conversion metric needs conversion_type_params".to_string()),
                Some(conversion) => {
                    check_input_slot(
                        metric,
                        "base",
                        conversion.base_measure.is_some(),
                        conversion.base_metric.is_some(),
                        issues,
                    );
                    check_input_slot(
                        metric,
                        "conversion",
                        conversion.conversion_measure.is_some(),
                        conversion.conversion_metric.is_some(),
                        issues,
                    );
                    for input in [metric.conversion_base_input(), metric.conversion_input()]
                        .into_iter()
                        .flatten()
                    {
                        let MeasureOrMetric::Measure(measure) = input else {
                            continue;
                        };
                        let Some(model) = model_of_measure(manifest, &measure.name) else {
                            continue;
                        };
                        if model.get_entity(&conversion.entity).is_none() {
                            issues.push(ValidationIssue::error(
                                metric_element(metric),
                                format!(
                                    "entity '{}' is not defined on semantic model '{}' of measure '{}'",
                                    conversion.entity, model.name, measure.name
                                ),
                            ));
                        }
                    }
                }
            },
        }
    }
}

fn check_input_slot(
    metric: &Metric,
    slot: &str,
    has_measure: bool,
    has_metric: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    match (has_measure, has_metric) {
        (false, false) => issues.push(ValidationIssue::error(
            metric_element(metric),
            format!("{} slot needs a measure or a metric", slot),
        )),
        (true, true) => issues.push(ValidationIssue::warning(
            metric_element(metric),
            format!("{} slot sets both a measure and a metric; the metric is used", slot),
        )),
        (true, false) | (false, true) => {}
    }
}

fn model_of_measure<'m>(manifest: &'m Manifest, measure: &str) -> Option<&'m SemanticModel> {
    manifest
        .semantic_models
        .iter()
        .find(|m| m.get_measure(measure).is_some())
}

pub(super) fn validate_metric_references(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    for metric in &manifest.metrics {
        let params = &metric.type_params;
        let mut measures: Vec<&str> = Vec::new();
        if let Some(measure) = &params.measure {
            measures.push(&measure.name);
        }
        if let Some(conversion) = &params.conversion_type_params {
            measures.extend(conversion.base_measure.iter().map(|m| m.name.as_str()));
            measures.extend(conversion.conversion_measure.iter().map(|m| m.name.as_str()));
        }
        for measure in measures {
            if model_of_measure(manifest, measure).is_none() {
                issues.push(ValidationIssue::error(
                    metric_element(metric),
                    format!("measure '{}' is not defined", measure),
                ));
            }
        }
        for input in metric.input_metrics() {
            if manifest.get_metric(&input.name).is_none() {
                issues.push(ValidationIssue::error(
                    metric_element(metric),
                    format!("input metric '{}' is not defined", input.name),
                ));
            }
        }
    }
}

pub(super) fn validate_metric_cycles(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for metric in &manifest.metrics {
        nodes
            .entry(metric.name.as_str())
            .or_insert_with(|| graph.add_node(metric.name.as_str()));
    }
    for metric in &manifest.metrics {
        let Some(&from) = nodes.get(metric.name.as_str()) else {
            continue;
        };
        for input in metric.input_metrics() {
            if let Some(&to) = nodes.get(input.name.as_str()) {
                graph.update_edge(from, to, ());
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|node| graph.contains_edge(*node, *node));
        if !cyclic {
            continue;
        }
        let mut names: Vec<&str> = component.iter().map(|n| graph[*n]).collect();
        names.sort_unstable();
        for name in &names {
            issues.push(ValidationIssue::error(
                ValidationElement::Metric(name.to_string()),
                format!("metric inputs form a cycle: {}", names.join(", ")),
            ));
        }
    }
}

pub(super) fn validate_time_spines(manifest: &Manifest, issues: &mut Vec<ValidationIssue>) {
    let spines = &manifest.project_configuration.time_spines;
    let needs_spine = manifest.metrics.iter().any(|metric| {
        metric.metric_type == MetricType::Cumulative
            || metric
                .input_metrics()
                .iter()
                .any(|input| input.offset_window.is_some() || input.offset_to_grain.is_some())
    });
    if needs_spine && spines.is_empty() {
        issues.push(ValidationIssue::error(
            ValidationElement::ProjectConfiguration,
            "cumulative metrics and time offsets need a time spine, but none is configured",
        ));
    }

    let mut custom = BTreeSet::new();
    for spine in spines {
        for granularity in &spine.custom_granularities {
            if granularity.name.parse::<TimeGranularity>().is_ok() {
                issues.push(ValidationIssue::error(
                    ValidationElement::ProjectConfiguration,
                    format!(
                        "custom granularity '{}' shadows a standard granularity",
                        granularity.name
                    ),
                ));
            }
            if !custom.insert(granularity.name.as_str()) {
                issues.push(ValidationIssue::error(
                    ValidationElement::ProjectConfiguration,
                    format!("custom granularity '{}' is defined more than once", granularity.name),
                ));
            }
        }
    }
}
