//! Metric evaluation planner - turns requested metrics into query batches.
//!
//! Two phases:
//! 1. Collect: walk metric inputs into [`MetricDescriptor`]s
//! 2. Batch: group level-0 descriptors into base queries by semantic model,
//!    then build recursive queries level by level over the earlier ones
//!
//! Levels come from a [`MetricLevelCache`] shared across planning runs for
//! one manifest.

pub mod descriptor;
pub mod error;
pub mod evaluation;
pub mod level;
pub mod metric_query;

pub use descriptor::{MetricDescriptor, MetricOffset};
pub use error::{PlannerError, PlannerResult};
pub use evaluation::{EvaluationPlan, MetricEvaluationPlanner};
pub use level::MetricLevelCache;
pub use metric_query::{
    BaseMetricQuery, BaseQueryKey, BaseQueryKind, MetricQuery, MetricQueryId, RecursiveMetricQuery,
};
