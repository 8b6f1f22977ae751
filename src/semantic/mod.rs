//! Semantic layer - what can be grouped by, and how to reach it.
//!
//! The layer is built bottom-up:
//!
//! 1. **Index** - name lookups over the manifest ([`SemanticModelIndex`])
//! 2. **Joins** - which model-to-model joins are safe ([`JoinPathEvaluator`])
//! 3. **Linkable elements** - every dimension, entity and metric reachable
//!    from a measure, with its join path ([`LinkableElementResolver`])
//!
//! Everything here is pure and synchronous over an immutable manifest.

pub mod error;
pub mod index;
pub mod join;
pub mod join_path;
pub mod linkable;
pub mod metric_lookup;
pub mod resolver;

pub use error::{SemanticError, SemanticResult};
pub use index::SemanticModelIndex;
pub use join::{Cardinality, JoinDescription, JoinPathEvaluator, SemanticModelJoinType};
pub use join_path::{JoinPathElement, SemanticModelJoinPath};
pub use linkable::{
    ElementPathKey, LinkableDimension, LinkableElement, LinkableElementFilter,
    LinkableElementProperty, LinkableElementSet, LinkableElementType, LinkableEntity,
    LinkableMetric, DUNDER, METRIC_TIME,
};
pub use metric_lookup::{measures_for_metric, metric_closure, MeasureScope};
pub use resolver::{LinkableElementResolver, DEFAULT_METRIC_TIME_GRANULARITY};
