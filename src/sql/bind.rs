//! Bind parameters carried alongside rendered SQL.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Value of a single bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlBindParameterValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlBindParameter {
    pub key: String,
    pub value: SqlBindParameterValue,
}

/// Ordered set of named bind parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlBindParameters {
    params: Vec<SqlBindParameter>,
}

impl SqlBindParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: SqlBindParameterValue) -> Self {
        let key = key.into();
        self.params.retain(|p| p.key != key);
        self.params.push(SqlBindParameter { key, value });
        self
    }

    pub fn get(&self, key: &str) -> Option<&SqlBindParameterValue> {
        self.params.iter().find(|p| p.key == key).map(|p| &p.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SqlBindParameter> {
        self.params.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Union of both parameter sets. A key bound in both keeps the value
    /// from `self`.
    pub fn combine(&self, other: &SqlBindParameters) -> SqlBindParameters {
        let mut combined = self.clone();
        for param in &other.params {
            match combined.get(&param.key) {
                Some(existing) if existing != &param.value => {
                    warn!(key = %param.key, "conflicting bind parameter values, keeping the first");
                }
                Some(_) => {}
                None => combined.params.push(param.clone()),
            }
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_keeps_first_value() {
        let a = SqlBindParameters::new().with("start", SqlBindParameterValue::String("2024-01-01".into()));
        let b = SqlBindParameters::new()
            .with("start", SqlBindParameterValue::String("2023-01-01".into()))
            .with("limit", SqlBindParameterValue::Int(10));

        let combined = a.combine(&b);
        assert_eq!(combined.len(), 2);
        assert_eq!(
            combined.get("start"),
            Some(&SqlBindParameterValue::String("2024-01-01".into()))
        );
        assert_eq!(combined.get("limit"), Some(&SqlBindParameterValue::Int(10)));
    }

    #[test]
    fn test_with_replaces_existing_key() {
        let params = SqlBindParameters::new()
            .with("x", SqlBindParameterValue::Int(1))
            .with("x", SqlBindParameterValue::Int(2));
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("x"), Some(&SqlBindParameterValue::Int(2)));
    }
}
