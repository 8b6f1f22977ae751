//! Planned sub-queries.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::descriptor::{MetricDescriptor, MetricOffset};
use crate::model::{MetricTimeWindow, PeriodAggregation, TimeGranularity};

/// Index of a query in an evaluation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricQueryId(pub usize);

impl fmt::Display for MetricQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// How a base query aggregates its measures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseQueryKind {
    Standard,
    /// Running aggregation over the time spine.
    Cumulative {
        window: Option<MetricTimeWindow>,
        grain_to_date: Option<TimeGranularity>,
        period_agg: PeriodAggregation,
    },
    /// Conversion events matched to base events. Filters restrict the base
    /// events, so each filter combination is its own query.
    Conversion {
        metric: String,
        filters: BTreeSet<String>,
    },
}

/// Level-0 descriptors sharing a key are computed in one scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BaseQueryKey {
    pub semantic_model: String,
    pub agg_time_dimension: String,
    pub offset: Option<MetricOffset>,
    pub kind: BaseQueryKind,
}

/// Aggregates measures from a single semantic model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseMetricQuery {
    pub id: MetricQueryId,
    pub key: BaseQueryKey,
    pub computed: Vec<MetricDescriptor>,
}

/// Computes metrics from the outputs of other queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecursiveMetricQuery {
    pub id: MetricQueryId,
    pub inputs: Vec<MetricQueryId>,
    pub computed: Vec<MetricDescriptor>,
    /// Input outputs carried through unchanged.
    pub passthrough: Vec<MetricDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricQuery {
    Base(BaseMetricQuery),
    Recursive(RecursiveMetricQuery),
}

impl MetricQuery {
    pub fn id(&self) -> MetricQueryId {
        match self {
            MetricQuery::Base(q) => q.id,
            MetricQuery::Recursive(q) => q.id,
        }
    }

    pub fn computed_metric_descriptors(&self) -> &[MetricDescriptor] {
        match self {
            MetricQuery::Base(q) => &q.computed,
            MetricQuery::Recursive(q) => &q.computed,
        }
    }

    pub fn passthrough_metric_descriptors(&self) -> &[MetricDescriptor] {
        match self {
            MetricQuery::Base(_) => &[],
            MetricQuery::Recursive(q) => &q.passthrough,
        }
    }

    pub fn input_queries(&self) -> &[MetricQueryId] {
        match self {
            MetricQuery::Base(_) => &[],
            MetricQuery::Recursive(q) => &q.inputs,
        }
    }

    /// Everything the query outputs: computed descriptors, then passthrough.
    pub fn outputs(&self) -> impl Iterator<Item = &MetricDescriptor> {
        self.computed_metric_descriptors()
            .iter()
            .chain(self.passthrough_metric_descriptors())
    }

    pub fn outputs_descriptor(&self, descriptor: &MetricDescriptor) -> bool {
        self.outputs().any(|d| d == descriptor)
    }
}

impl fmt::Display for MetricQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |descriptors: &[MetricDescriptor]| {
            descriptors
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            MetricQuery::Base(q) => {
                write!(
                    f,
                    "{} base {} ({})",
                    q.id, q.key.semantic_model, q.key.agg_time_dimension
                )?;
                match &q.key.kind {
                    BaseQueryKind::Standard => {}
                    BaseQueryKind::Cumulative { .. } => write!(f, " cumulative")?,
                    BaseQueryKind::Conversion { metric, .. } => write!(f, " conversion {}", metric)?,
                }
                if let Some(offset) = &q.key.offset {
                    write!(f, " {}", offset)?;
                }
                write!(f, ": computes {}", join(&q.computed))
            }
            MetricQuery::Recursive(q) => {
                let inputs: Vec<String> = q.inputs.iter().map(|i| i.to_string()).collect();
                write!(f, "{} from [{}]", q.id, inputs.join(", "))?;
                let mut separator = ":";
                if !q.computed.is_empty() {
                    write!(f, ": computes {}", join(&q.computed))?;
                    separator = ";";
                }
                if !q.passthrough.is_empty() {
                    write!(f, "{} passes {}", separator, join(&q.passthrough))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_and_display() {
        let base = MetricQuery::Base(BaseMetricQuery {
            id: MetricQueryId(0),
            key: BaseQueryKey {
                semantic_model: "bookings_source".into(),
                agg_time_dimension: "ds".into(),
                offset: None,
                kind: BaseQueryKind::Standard,
            },
            computed: vec![MetricDescriptor::plain("bookings")],
        });
        assert_eq!(base.to_string(), "q0 base bookings_source (ds): computes bookings");
        assert!(base.input_queries().is_empty());

        let top = MetricQuery::Recursive(RecursiveMetricQuery {
            id: MetricQueryId(1),
            inputs: vec![MetricQueryId(0)],
            computed: vec![MetricDescriptor::plain("bookings_growth")],
            passthrough: vec![MetricDescriptor::plain("bookings")],
        });
        assert!(top.outputs_descriptor(&MetricDescriptor::plain("bookings")));
        assert_eq!(top.outputs().count(), 2);
        assert_eq!(
            top.to_string(),
            "q1 from [q0]: computes bookings_growth; passes bookings"
        );
    }
}
