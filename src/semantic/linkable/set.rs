//! Sets of linkable elements keyed by path key.
//!
//! Elements sharing a path key are kept side by side: several entries under
//! one key mean the element is reachable through more than one join path.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::element::{
    ElementPathKey, LinkableDimension, LinkableElementProperty, LinkableEntity, LinkableMetric,
};

/// Common view over the three kinds of linkable element.
pub trait LinkableElement: Clone + Ord {
    fn path_key(&self) -> &ElementPathKey;
    fn properties(&self) -> &BTreeSet<LinkableElementProperty>;
}

impl LinkableElement for LinkableDimension {
    fn path_key(&self) -> &ElementPathKey {
        &self.path_key
    }

    fn properties(&self) -> &BTreeSet<LinkableElementProperty> {
        &self.properties
    }
}

impl LinkableElement for LinkableEntity {
    fn path_key(&self) -> &ElementPathKey {
        &self.path_key
    }

    fn properties(&self) -> &BTreeSet<LinkableElementProperty> {
        &self.properties
    }
}

impl LinkableElement for LinkableMetric {
    fn path_key(&self) -> &ElementPathKey {
        &self.path_key
    }

    fn properties(&self) -> &BTreeSet<LinkableElementProperty> {
        &self.properties
    }
}

/// Property predicates applied to a set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkableElementFilter {
    /// Keep only elements with at least one of these properties.
    pub with_any_of: Option<BTreeSet<LinkableElementProperty>>,
    /// Drop elements with any of these properties.
    pub without_any_of: BTreeSet<LinkableElementProperty>,
    /// Drop elements that have every one of these properties.
    pub without_all_of: BTreeSet<LinkableElementProperty>,
    /// Keep only elements with one of these names.
    pub element_names: Option<BTreeSet<String>>,
}

impl LinkableElementFilter {
    pub fn with_any_of(properties: impl IntoIterator<Item = LinkableElementProperty>) -> Self {
        Self {
            with_any_of: Some(properties.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn without_any_of(properties: impl IntoIterator<Item = LinkableElementProperty>) -> Self {
        Self {
            without_any_of: properties.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn without_all_of(properties: impl IntoIterator<Item = LinkableElementProperty>) -> Self {
        Self {
            without_all_of: properties.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn allows<E: LinkableElement>(&self, element: &E) -> bool {
        let properties = element.properties();
        if let Some(names) = &self.element_names {
            if !names.contains(&element.path_key().element_name) {
                return false;
            }
        }
        if let Some(with_any_of) = &self.with_any_of {
            if with_any_of.is_disjoint(properties) {
                return false;
            }
        }
        if !self.without_any_of.is_disjoint(properties) {
            return false;
        }
        if !self.without_all_of.is_empty() && self.without_all_of.is_subset(properties) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkableElementSet {
    pub dimensions: BTreeMap<ElementPathKey, Vec<LinkableDimension>>,
    pub entities: BTreeMap<ElementPathKey, Vec<LinkableEntity>>,
    pub metrics: BTreeMap<ElementPathKey, Vec<LinkableMetric>>,
}

impl LinkableElementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dimension(&mut self, dimension: LinkableDimension) {
        push_unique(&mut self.dimensions, dimension);
    }

    pub fn add_entity(&mut self, entity: LinkableEntity) {
        push_unique(&mut self.entities, entity);
    }

    pub fn add_metric(&mut self, metric: LinkableMetric) {
        push_unique(&mut self.metrics, metric);
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.entities.is_empty() && self.metrics.is_empty()
    }

    /// Every path key in the set.
    pub fn path_keys(&self) -> BTreeSet<ElementPathKey> {
        self.dimensions
            .keys()
            .chain(self.entities.keys())
            .chain(self.metrics.keys())
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &ElementPathKey) -> bool {
        self.dimensions.contains_key(key)
            || self.entities.contains_key(key)
            || self.metrics.contains_key(key)
    }

    /// Union of the sets. Elements under the same key are pooled.
    pub fn merge_by_path_key<'a>(sets: impl IntoIterator<Item = &'a LinkableElementSet>) -> Self {
        let mut merged = Self::new();
        for set in sets {
            for element in set.dimensions.values().flatten() {
                merged.add_dimension(element.clone());
            }
            for element in set.entities.values().flatten() {
                merged.add_entity(element.clone());
            }
            for element in set.metrics.values().flatten() {
                merged.add_metric(element.clone());
            }
        }
        merged
    }

    /// Keys present in every set, with their elements pooled. An empty input
    /// gives an empty set.
    pub fn intersection_by_path_key(sets: &[LinkableElementSet]) -> Self {
        let Some((first, rest)) = sets.split_first() else {
            return Self::new();
        };
        if rest.is_empty() {
            return first.clone();
        }
        Self {
            dimensions: intersect_maps(sets.iter().map(|s| &s.dimensions)),
            entities: intersect_maps(sets.iter().map(|s| &s.entities)),
            metrics: intersect_maps(sets.iter().map(|s| &s.metrics)),
        }
    }

    /// Drop keys reachable in more than one way.
    pub fn only_unique_path_keys(&self) -> Self {
        Self {
            dimensions: only_unique(&self.dimensions),
            entities: only_unique(&self.entities),
            metrics: only_unique(&self.metrics),
        }
    }

    pub fn filter(&self, filter: &LinkableElementFilter) -> Self {
        Self {
            dimensions: filter_map(&self.dimensions, filter),
            entities: filter_map(&self.entities, filter),
            metrics: filter_map(&self.metrics, filter),
        }
    }

    /// Qualified names of every key, sorted.
    pub fn qualified_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.path_keys().iter().map(|k| k.qualified_name()).collect();
        names.sort();
        names.dedup();
        names
    }
}

fn push_unique<E: LinkableElement>(map: &mut BTreeMap<ElementPathKey, Vec<E>>, element: E) {
    let bucket = map.entry(element.path_key().clone()).or_default();
    if !bucket.contains(&element) {
        bucket.push(element);
        bucket.sort();
    }
}

fn intersect_maps<'a, E: LinkableElement + 'a>(
    maps: impl Iterator<Item = &'a BTreeMap<ElementPathKey, Vec<E>>> + Clone,
) -> BTreeMap<ElementPathKey, Vec<E>> {
    let mut result = BTreeMap::new();
    let mut iter = maps.clone();
    let Some(first) = iter.next() else {
        return result;
    };
    for key in first.keys() {
        if !maps.clone().all(|m| m.contains_key(key)) {
            continue;
        }
        for map in maps.clone() {
            for element in map.get(key).into_iter().flatten() {
                push_unique(&mut result, element.clone());
            }
        }
    }
    result
}

fn only_unique<E: LinkableElement>(
    map: &BTreeMap<ElementPathKey, Vec<E>>,
) -> BTreeMap<ElementPathKey, Vec<E>> {
    map.iter()
        .filter(|(_, elements)| elements.len() == 1)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn filter_map<E: LinkableElement>(
    map: &BTreeMap<ElementPathKey, Vec<E>>,
    filter: &LinkableElementFilter,
) -> BTreeMap<ElementPathKey, Vec<E>> {
    map.iter()
        .filter_map(|(key, elements)| {
            let kept: Vec<E> = elements.iter().filter(|e| filter.allows(*e)).cloned().collect();
            (!kept.is_empty()).then(|| (key.clone(), kept))
        })
        .collect()
}
