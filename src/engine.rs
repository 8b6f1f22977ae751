//! End-to-end query engine: manifest in, SQL and results out.
//!
//! ```text
//! QueryRequest → resolve → evaluation plan → dataflow plan → SQL → execution plan
//!                                                                       │
//!                                                     SqlClient ◄───────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use meridian::engine::QueryEngine;
//! use meridian::query::QueryRequest;
//!
//! let engine = QueryEngine::from_settings(Settings::load()?)?;
//! let request = QueryRequest::new()
//!     .metric("bookings")
//!     .group_by("metric_time__month")
//!     .group_by("listing__country");
//! println!("{}", engine.explain(&request)?.sql());
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Settings, SettingsError};
use crate::dataflow::{DataflowPlan, DataflowPlanBuilder, DataflowToSqlRenderer, RenderedSql};
use crate::execution::{
    CancellationToken, DataflowToExecutionPlanConverter, ExecutionPlan, ExecutionPlanError,
    ExecutionResults, PlanExecutor, SqlClient,
};
use crate::model::{load_manifest_file, normalize_conversion_inputs, Manifest, ManifestError};
use crate::planner::{EvaluationPlan, MetricEvaluationPlanner, MetricLevelCache, PlannerError};
use crate::query::{resolve_query, QueryRequest, ResolvedQuery};
use crate::semantic::{
    LinkableElementFilter, LinkableElementResolver, LinkableElementSet, SemanticError,
    SemanticModelIndex,
};
use crate::sql::Dialect;
use crate::validation::{validate_manifest, ModelValidationResults};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Manifest failed validation:\n{0}")]
    InvalidManifest(ModelValidationResults),

    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("Execution plan error: {0}")]
    ExecutionPlan(#[from] ExecutionPlanError),

    #[error("No manifest_path configured")]
    MissingManifestPath,
}

pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// Result Types
// ============================================================================

/// Every plan built for one request, without running anything.
#[derive(Debug, Clone)]
pub struct QueryExplanation {
    pub resolved: ResolvedQuery,
    /// `None` for distinct-values queries, which have no metrics to plan.
    pub evaluation_plan: Option<EvaluationPlan>,
    pub dataflow_plan: DataflowPlan,
    pub rendered: RenderedSql,
    pub execution_plan: ExecutionPlan,
    pub dialect: Dialect,
}

impl QueryExplanation {
    pub fn sql(&self) -> &str {
        &self.rendered.sql
    }
}

// ============================================================================
// Engine
// ============================================================================

/// A validated manifest with everything needed to plan queries against it.
///
/// Evaluation levels are cached per manifest and shared by every request
/// the engine serves.
#[derive(Debug)]
pub struct QueryEngine {
    index: SemanticModelIndex,
    levels: MetricLevelCache,
    settings: Settings,
    warnings: ModelValidationResults,
}

impl QueryEngine {
    /// Validate and index a manifest. Blocking validation issues are
    /// returned as [`EngineError::InvalidManifest`].
    pub fn new(mut manifest: Manifest, settings: Settings) -> EngineResult<Self> {
        settings.validate()?;

        let results = validate_manifest(&manifest);
        if results.has_blocking_issues() {
            return Err(EngineError::InvalidManifest(results));
        }
        for issue in results.warnings() {
            warn!(%issue, "manifest validation warning");
        }

        let added = normalize_conversion_inputs(&mut manifest);
        if !added.is_empty() {
            debug!(metrics = ?added, "added simple metrics for conversion measure inputs");
        }

        let levels = MetricLevelCache::for_manifest(&manifest).map_err(ManifestError::from)?;
        let index = SemanticModelIndex::new(Arc::new(manifest))?;
        // Fails early on join configurations the resolver cannot use.
        LinkableElementResolver::new(&index, settings.planner.max_entity_links)?;

        info!(
            semantic_models = index.semantic_models().len(),
            metrics = index.metrics().len(),
            fingerprint = %levels.fingerprint(),
            "query engine ready"
        );
        Ok(Self {
            index,
            levels,
            settings,
            warnings: results,
        })
    }

    /// Load the manifest named by `settings.manifest_path`.
    pub fn from_settings(settings: Settings) -> EngineResult<Self> {
        let path = settings
            .resolved_manifest_path()?
            .ok_or(EngineError::MissingManifestPath)?;
        let manifest = load_manifest_file(&path)?;
        Self::new(manifest, settings)
    }

    pub fn manifest(&self) -> &Manifest {
        self.index.manifest()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Non-blocking issues found when the manifest was validated.
    pub fn validation_warnings(&self) -> &ModelValidationResults {
        &self.warnings
    }

    pub fn fingerprint(&self) -> &str {
        self.levels.fingerprint()
    }

    fn resolver(&self) -> EngineResult<LinkableElementResolver<'_>> {
        Ok(LinkableElementResolver::new(
            &self.index,
            self.settings.planner.max_entity_links,
        )?)
    }

    /// Plan a request in the configured dialect.
    pub fn explain(&self, request: &QueryRequest) -> EngineResult<QueryExplanation> {
        self.explain_for_dialect(request, self.settings.planner.dialect)
    }

    pub fn explain_for_dialect(
        &self,
        request: &QueryRequest,
        dialect: Dialect,
    ) -> EngineResult<QueryExplanation> {
        let resolver = self.resolver()?;
        let resolved = resolve_query(&self.index, &resolver, request)?;
        let builder = DataflowPlanBuilder::new(&self.index, &resolver, dialect);

        let (evaluation_plan, dataflow_plan) = if resolved.is_distinct_values() {
            (None, builder.build_distinct_values(&resolved)?)
        } else {
            let plan = MetricEvaluationPlanner::new(&self.index, &self.levels).plan(&resolved.metrics)?;
            let dataflow = builder.build(&resolved, &plan)?;
            (Some(plan), dataflow)
        };

        let rendered = DataflowToSqlRenderer::new(dialect).render(&dataflow_plan)?;
        let execution_plan = DataflowToExecutionPlanConverter::from_rendered(rendered.clone());
        debug!(
            metrics = resolved.metrics.len(),
            group_by = resolved.group_by.len(),
            ?dialect,
            "explained query"
        );

        Ok(QueryExplanation {
            resolved,
            evaluation_plan,
            dataflow_plan,
            rendered,
            execution_plan,
            dialect,
        })
    }

    /// Plan a request in the client's dialect and run it.
    ///
    /// Task failures are reported in the returned results, not as `Err`.
    pub async fn query(
        &self,
        request: &QueryRequest,
        client: &dyn SqlClient,
        cancel: &CancellationToken,
    ) -> EngineResult<ExecutionResults> {
        let explanation = self.explain_for_dialect(request, client.dialect())?;
        let executor = PlanExecutor::new(self.settings.execution.max_concurrency);
        let results = executor
            .execute(&explanation.execution_plan, client, cancel)
            .await?;
        if results.contains_task_errors() {
            warn!(errors = ?results.error_messages(), "query finished with task errors");
        }
        Ok(results)
    }

    /// Elements every named metric can be grouped by.
    pub fn linkable_elements_for_metrics(
        &self,
        metrics: &[&str],
        filter: &LinkableElementFilter,
    ) -> EngineResult<LinkableElementSet> {
        for metric in metrics {
            self.index.get_metric(metric)?;
        }
        Ok(self.resolver()?.linkable_elements_for_metrics(metrics, filter)?)
    }

    /// Elements a query without metrics can list the values of.
    pub fn dimension_values_elements(
        &self,
        filter: &LinkableElementFilter,
    ) -> EngineResult<LinkableElementSet> {
        Ok(self
            .resolver()?
            .linkable_elements_for_distinct_values_query(filter)?)
    }
}
