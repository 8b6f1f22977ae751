//! Linkable elements and sets of them.

pub mod element;
pub mod set;

pub use element::{
    ElementPathKey, LinkableDimension, LinkableElementProperty, LinkableElementType,
    LinkableEntity, LinkableMetric, DUNDER, METRIC_TIME,
};
pub use set::{LinkableElement, LinkableElementFilter, LinkableElementSet};
