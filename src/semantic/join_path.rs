//! Join paths between semantic models.
//!
//! A path is an immutable, flat sequence of hops starting at a left model.
//! Extending a path produces a new value; extensions that would revisit a
//! model or reuse an entity are refused, so cycles cannot be represented.

use std::fmt;

use serde::Serialize;

/// One hop of a join path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JoinPathElement {
    pub right_model: String,
    pub join_on_entity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SemanticModelJoinPath {
    pub left_model: String,
    pub path_elements: Vec<JoinPathElement>,
}

impl SemanticModelJoinPath {
    /// The empty path: elements local to `left_model`.
    pub fn local(left_model: impl Into<String>) -> Self {
        Self {
            left_model: left_model.into(),
            path_elements: Vec::new(),
        }
    }

    /// Append a hop. Returns `None` when `right_model` is already on the
    /// path or `entity` was already used to join.
    pub fn extend(&self, right_model: &str, entity: &str) -> Option<Self> {
        if self.contains_model(right_model) || self.uses_entity(entity) {
            return None;
        }
        let mut path_elements = self.path_elements.clone();
        path_elements.push(JoinPathElement {
            right_model: right_model.to_string(),
            join_on_entity: entity.to_string(),
        });
        Some(Self {
            left_model: self.left_model.clone(),
            path_elements,
        })
    }

    pub fn len(&self) -> usize {
        self.path_elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_elements.is_empty()
    }

    /// Model at the end of the path.
    pub fn last_model(&self) -> &str {
        self.path_elements
            .last()
            .map(|e| e.right_model.as_str())
            .unwrap_or(&self.left_model)
    }

    /// Entities joined on, in order. This is the prefix of elements reached
    /// through the path.
    pub fn entity_links(&self) -> Vec<String> {
        self.path_elements
            .iter()
            .map(|e| e.join_on_entity.clone())
            .collect()
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.left_model == model || self.path_elements.iter().any(|e| e.right_model == model)
    }

    pub fn uses_entity(&self, entity: &str) -> bool {
        self.path_elements.iter().any(|e| e.join_on_entity == entity)
    }

    /// Models on the path, starting with the left model.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.left_model.as_str())
            .chain(self.path_elements.iter().map(|e| e.right_model.as_str()))
    }
}

impl fmt::Display for SemanticModelJoinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.left_model)?;
        for element in &self.path_elements {
            write!(f, " -[{}]-> {}", element.join_on_entity, element.right_model)?;
        }
        Ok(())
    }
}
