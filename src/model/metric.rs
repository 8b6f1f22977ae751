//! Metric definitions.

use std::fmt;
use std::str::FromStr;

use inflector::Inflector;
use serde::{Deserialize, Serialize};

use super::semantic_model::{AggregationType, MeasureAggregationParameters, NonAdditiveDimension};
use super::time::TimeGranularity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Simple,
    Derived,
    Ratio,
    Cumulative,
    Conversion,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricType::Simple => "simple",
            MetricType::Derived => "derived",
            MetricType::Ratio => "ratio",
            MetricType::Cumulative => "cumulative",
            MetricType::Conversion => "conversion",
        };
        f.write_str(name)
    }
}

/// A named, typed computation exposed to query users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub type_params: MetricTypeParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WhereFilterIntersection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Metric {
    /// Metrics this metric is computed from, in declaration order.
    pub fn input_metrics(&self) -> Vec<&MetricInput> {
        let params = &self.type_params;
        match self.metric_type {
            MetricType::Simple => vec![],
            MetricType::Derived => params.metrics.iter().flatten().collect(),
            MetricType::Ratio => params
                .numerator
                .iter()
                .chain(params.denominator.iter())
                .collect(),
            MetricType::Cumulative => match self.cumulative_input() {
                Some(MeasureOrMetric::Metric(input)) => vec![input],
                Some(MeasureOrMetric::Measure(_)) | None => vec![],
            },
            MetricType::Conversion => {
                let mut inputs = Vec::new();
                if let Some(MeasureOrMetric::Metric(input)) = self.conversion_base_input() {
                    inputs.push(input);
                }
                if let Some(MeasureOrMetric::Metric(input)) = self.conversion_input() {
                    inputs.push(input);
                }
                inputs
            }
        }
    }

    /// Input of a cumulative metric. The nested metric wins when both a
    /// measure and a metric are set.
    pub fn cumulative_input(&self) -> Option<MeasureOrMetric<'_>> {
        let nested_metric = self
            .type_params
            .cumulative_type_params
            .as_ref()
            .and_then(|c| c.metric.as_ref());
        pick_input(self.type_params.measure.as_ref(), nested_metric)
    }

    pub fn conversion_base_input(&self) -> Option<MeasureOrMetric<'_>> {
        let params = self.type_params.conversion_type_params.as_ref()?;
        pick_input(
            params.base_measure.as_ref(),
            params.base_metric.as_ref(),
        )
    }

    pub fn conversion_input(&self) -> Option<MeasureOrMetric<'_>> {
        let params = self.type_params.conversion_type_params.as_ref()?;
        pick_input(
            params.conversion_measure.as_ref(),
            params.conversion_metric.as_ref(),
        )
    }

    /// Effective cumulative window: the nested parameter, else the legacy
    /// top-level one.
    pub fn cumulative_window(&self) -> Option<&MetricTimeWindow> {
        self.type_params
            .cumulative_type_params
            .as_ref()
            .and_then(|c| c.window.as_ref())
            .or(self.type_params.window.as_ref())
    }

    pub fn cumulative_grain_to_date(&self) -> Option<TimeGranularity> {
        self.type_params
            .cumulative_type_params
            .as_ref()
            .and_then(|c| c.grain_to_date)
            .or(self.type_params.grain_to_date)
    }

    pub fn cumulative_period_agg(&self) -> PeriodAggregation {
        self.type_params
            .cumulative_type_params
            .as_ref()
            .map(|c| c.period_agg)
            .unwrap_or_default()
    }
}

/// A metric in the slot takes precedence; validation warns when both are set.
fn pick_input<'a>(
    measure: Option<&'a MetricInputMeasure>,
    metric: Option<&'a MetricInput>,
) -> Option<MeasureOrMetric<'a>> {
    match (measure, metric) {
        (_, Some(metric)) => Some(MeasureOrMetric::Metric(metric)),
        (Some(measure), None) => Some(MeasureOrMetric::Measure(measure)),
        (None, None) => None,
    }
}

/// An input slot that accepts either a measure or a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasureOrMetric<'a> {
    Measure(&'a MetricInputMeasure),
    Metric(&'a MetricInput),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricTypeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<MetricInputMeasure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<MetricTimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain_to_date: Option<TimeGranularity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_type_params: Option<CumulativeTypeParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_type_params: Option<ConversionTypeParams>,
    /// Aggregation declared inline on a simple metric instead of through a
    /// named measure. Normalized into a measure when the manifest is loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_aggregation_params: Option<MetricAggregationParams>,
}

/// Reference to a measure from a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInputMeasure {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WhereFilterIntersection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Value substituted for NULL aggregates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_nulls_with: Option<i64>,
}

impl MetricInputMeasure {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            alias: None,
            fill_nulls_with: None,
        }
    }
}

/// Reference to a metric from a composite metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<WhereFilterIntersection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_window: Option<MetricTimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_to_grain: Option<TimeGranularity>,
}

impl MetricInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            alias: None,
            offset_window: None,
            offset_to_grain: None,
        }
    }

    /// Name this input is referred to by in a derived expression.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodAggregation {
    #[default]
    First,
    Last,
    Average,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumulativeTypeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<MetricTimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain_to_date: Option<TimeGranularity>,
    #[serde(default)]
    pub period_agg: PeriodAggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricInput>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionCalculationType {
    Conversions,
    #[default]
    ConversionRate,
}

/// Property that must match between a base event and its conversion event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstantProperty {
    pub base_property: String,
    pub conversion_property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionTypeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_measure: Option<MetricInputMeasure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_metric: Option<MetricInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_measure: Option<MetricInputMeasure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_metric: Option<MetricInput>,
    pub entity: String,
    #[serde(default)]
    pub calculation: ConversionCalculationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<MetricTimeWindow>,
    #[serde(default)]
    pub constant_properties: Vec<ConstantProperty>,
}

/// Inline aggregation on a simple metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregationParams {
    pub semantic_model: String,
    pub agg: AggregationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_time_dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_params: Option<MeasureAggregationParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_additive_dimension: Option<NonAdditiveDimension>,
}

// =============================================================================
// Time windows
// =============================================================================

/// A window such as `7 days` or `1 month`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "MetricTimeWindowRepr", into = "String")]
pub struct MetricTimeWindow {
    pub count: u32,
    pub granularity: TimeGranularity,
}

impl MetricTimeWindow {
    pub fn new(count: u32, granularity: TimeGranularity) -> Self {
        Self { count, granularity }
    }
}

impl fmt::Display for MetricTimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.granularity.name();
        if self.count == 1 {
            write!(f, "1 {}", unit)
        } else {
            write!(f, "{} {}", self.count, unit.to_plural())
        }
    }
}

impl FromStr for MetricTimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [count, unit] = parts.as_slice() else {
            return Err(format!(
                "invalid window '{}': expected '<count> <granularity>'",
                s
            ));
        };
        let count: u32 = count
            .parse()
            .map_err(|_| format!("invalid window count in '{}'", s))?;
        let granularity = unit.to_lowercase().to_singular().parse()?;
        Ok(Self { count, granularity })
    }
}

impl From<MetricTimeWindow> for String {
    fn from(window: MetricTimeWindow) -> Self {
        window.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetricTimeWindowRepr {
    Text(String),
    Structured {
        count: u32,
        granularity: TimeGranularity,
    },
}

impl TryFrom<MetricTimeWindowRepr> for MetricTimeWindow {
    type Error = String;

    fn try_from(repr: MetricTimeWindowRepr) -> Result<Self, Self::Error> {
        match repr {
            MetricTimeWindowRepr::Text(s) => s.parse(),
            MetricTimeWindowRepr::Structured { count, granularity } => {
                Ok(Self { count, granularity })
            }
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// A where filter as a SQL template, e.g.
/// `{{ Dimension('listing__country') }} = 'us'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WhereFilter {
    pub where_sql_template: String,
}

/// Filters that must all hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhereFilterIntersection {
    #[serde(default)]
    pub where_filters: Vec<WhereFilter>,
}

impl WhereFilterIntersection {
    pub fn from_templates<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            where_filters: templates
                .into_iter()
                .map(|t| WhereFilter {
                    where_sql_template: t.into(),
                })
                .collect(),
        }
    }

    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.where_filters.iter().map(|f| f.where_sql_template.as_str())
    }
}
