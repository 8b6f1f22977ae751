//! Query requests and their resolution against the semantic layer.

pub mod filter;
pub mod names;
pub mod request;
pub mod resolve;

pub use filter::{ResolvedFilter, WhereFilterSpec};
pub use names::resolve_element_name;
pub use request::{OutputTarget, QueryRequest, TimeConstraint};
pub use resolve::{resolve_query, OrderByItem, ResolvedQuery};
