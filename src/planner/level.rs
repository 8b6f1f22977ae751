//! Evaluation levels.
//!
//! A metric's level is its dependency depth: 0 for metrics computed
//! directly from measures, otherwise one more than its deepest input.
//! Levels only depend on metric definitions, so they are cached for the
//! lifetime of one manifest.

use dashmap::DashMap;

use crate::model::Manifest;
use crate::semantic::{SemanticError, SemanticModelIndex, SemanticResult};

/// Level cache scoped to one manifest, shareable across planner runs.
///
/// Concurrent lookups may compute the same level twice; both writes store
/// the same value.
#[derive(Debug, Default)]
pub struct MetricLevelCache {
    fingerprint: String,
    levels: DashMap<String, usize>,
}

impl MetricLevelCache {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            levels: DashMap::new(),
        }
    }

    pub fn for_manifest(manifest: &Manifest) -> Result<Self, serde_json::Error> {
        Ok(Self::new(manifest.fingerprint()?))
    }

    /// Fingerprint of the manifest the cached levels belong to.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, index: &SemanticModelIndex, metric_name: &str) -> SemanticResult<usize> {
        let mut stack = Vec::new();
        self.level_inner(index, metric_name, &mut stack)
    }

    fn level_inner(
        &self,
        index: &SemanticModelIndex,
        metric_name: &str,
        stack: &mut Vec<String>,
    ) -> SemanticResult<usize> {
        if let Some(level) = self.levels.get(metric_name) {
            return Ok(*level);
        }
        if stack.iter().any(|m| m == metric_name) {
            let mut cycle = stack.clone();
            cycle.push(metric_name.to_string());
            return Err(SemanticError::CyclicDependency(cycle));
        }

        let metric = index.get_metric(metric_name)?;
        stack.push(metric_name.to_string());
        let mut level = 0;
        for input in metric.input_metrics() {
            level = level.max(self.level_inner(index, &input.name, stack)? + 1);
        }
        stack.pop();

        self.levels.insert(metric_name.to_string(), level);
        Ok(level)
    }
}
