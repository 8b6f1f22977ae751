//! Resolving element names like `listing__country` against a linkable set.

use crate::semantic::{
    ElementPathKey, LinkableElementSet, LinkableElementType, SemanticError, SemanticResult, DUNDER,
};
use crate::model::{DatePart, TimeGranularity};

const EXTRACT_PREFIX: &str = "extract_";

/// Find the path key named by `name` in `set`.
///
/// Accepted forms, tried in order:
/// - `[links__]element__extract_<part>`: the date part at the element's
///   finest granularity
/// - `[links__]element__<granularity>`: standard or custom granularity
/// - `[links__]element`: a dimension, a time dimension at its finest
///   standard granularity, an entity, or a metric
pub fn resolve_element_name(
    name: &str,
    set: &LinkableElementSet,
) -> SemanticResult<Option<ElementPathKey>> {
    let parts: Vec<&str> = name.split(DUNDER).collect();
    if name.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(SemanticError::InvalidGroupByName(name.to_string()));
    }
    let keys = set.path_keys();

    if let [links @ .., element, last] = parts.as_slice() {
        if let Some(part) = last.strip_prefix(EXTRACT_PREFIX) {
            let date_part: DatePart = part
                .parse()
                .map_err(|_| SemanticError::InvalidGroupByName(name.to_string()))?;
            let found = keys
                .iter()
                .filter(|k| {
                    k.element_type == LinkableElementType::TimeDimension
                        && k.element_name == *element
                        && k.entity_links == links
                        && k.date_part == Some(date_part)
                })
                .min_by_key(|k| k.time_granularity.as_ref().map(|g| g.base_granularity));
            return Ok(found.cloned());
        }

        let grained = keys.iter().find(|k| {
            k.element_type == LinkableElementType::TimeDimension
                && k.element_name == *element
                && k.entity_links == links
                && k.date_part.is_none()
                && k.time_granularity.as_ref().is_some_and(|g| g.name == *last)
        });
        if let Some(key) = grained {
            return Ok(Some(key.clone()));
        }
    }

    let Some((element, links)) = parts.split_last() else {
        return Ok(None);
    };
    let matches = |k: &&ElementPathKey| k.element_name == *element && k.entity_links == links;

    if let Some(key) = keys
        .iter()
        .filter(matches)
        .find(|k| k.element_type == LinkableElementType::Dimension)
    {
        return Ok(Some(key.clone()));
    }
    let finest_time = keys
        .iter()
        .filter(matches)
        .filter(|k| k.element_type == LinkableElementType::TimeDimension && k.date_part.is_none())
        .filter_map(|k| {
            let granularity = k.time_granularity.as_ref()?;
            (!granularity.is_custom()).then_some((granularity.base_granularity, k))
        })
        .min_by_key(|(g, _): &(TimeGranularity, &ElementPathKey)| *g);
    if let Some((_, key)) = finest_time {
        return Ok(Some(key.clone()));
    }
    for element_type in [LinkableElementType::Entity, LinkableElementType::Metric] {
        if let Some(key) = keys
            .iter()
            .filter(matches)
            .find(|k| k.element_type == element_type)
        {
            return Ok(Some(key.clone()));
        }
    }
    Ok(None)
}
