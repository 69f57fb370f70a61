//! Engine - the query facade
//!
//! An [`Engine`] turns a logical plan into an executable query:
//!
//! ```text
//! Node ──optimizers──▶ Node ──PhysicalPlanner──▶ operator tree ──QueryExecutor──▶ QueryResult
//!           │                                          │
//!           ▼                                          ▼
//!      annotations                            explain() / analyze()
//! ```
//!
//! Each query owns one [`VectorPool`] shared by its whole operator tree.
//! Optimizer annotations and warnings raised while executing end up in the
//! result's metadata.

use crate::config::EngineConfig;
use crate::metrics::{self, InFlightGuard};
use crate::query::annotations::Annotations;
use crate::query::error::{QueryError, Result};
use crate::query::executor::{ExecutionContext, QueryExecutor};
use crate::query::operators::pool::DEFAULT_MAX_RETAINED;
use crate::query::operators::{BoxedOperator, Explanation, VectorPool};
use crate::query::optimizer::{Optimizer, PassthroughOptimizer};
use crate::query::options::{QueryOptions, DEFAULT_LOOKBACK_DELTA_MS, DEFAULT_STEPS_BATCH};
use crate::query::physical::{LoweringConfig, PhysicalPlanner};
use crate::query::plan::Node;
use crate::query::remote::RemoteEndpoints;
use crate::query::result::{QueryResult, Series};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-query timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Engine Options
// ============================================================================

/// Engine construction options
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOpts {
    /// Upper bound on a query's run time
    pub timeout: Duration,
    /// Selector lookback window in milliseconds
    pub lookback_delta_ms: i64,
    /// Steps per operator batch
    pub steps_batch: usize,
    /// Record operator telemetry for `analyze`
    pub enable_analysis: bool,
    /// Selector shards per vector selector
    pub decoding_concurrency: usize,
    /// Batches buffered by concurrent operators
    pub concurrent_buffer_size: usize,
    /// Buffers of each kind a query's pool keeps for reuse
    pub pool_max_retained: usize,
}

impl Default for EngineOpts {
    fn default() -> Self {
        let lowering = LoweringConfig::default();
        Self {
            timeout: DEFAULT_TIMEOUT,
            lookback_delta_ms: DEFAULT_LOOKBACK_DELTA_MS,
            steps_batch: DEFAULT_STEPS_BATCH,
            enable_analysis: false,
            decoding_concurrency: lowering.decoding_concurrency,
            concurrent_buffer_size: lowering.concurrent_buffer_size,
            pool_max_retained: DEFAULT_MAX_RETAINED,
        }
    }
}

impl From<&EngineConfig> for EngineOpts {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            lookback_delta_ms: config.lookback_delta_ms,
            steps_batch: config.steps_batch,
            enable_analysis: config.enable_analysis,
            decoding_concurrency: config.decoding_concurrency,
            concurrent_buffer_size: config.concurrent_buffer_size,
            pool_max_retained: config.pool_max_retained,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Plans and runs queries against a storage
///
/// Cheap to clone; clones share their optimizers.
#[derive(Clone)]
pub struct Engine {
    opts: EngineOpts,
    optimizers: Vec<Arc<dyn Optimizer>>,
}

impl Engine {
    /// Create an engine without optimizers
    pub fn new(opts: EngineOpts) -> Self {
        Self {
            opts,
            optimizers: Vec::new(),
        }
    }

    /// Create an engine from configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(EngineOpts::from(config))
    }

    /// Delegate whole queries to remote backends when one backend owns them
    pub fn with_remote_endpoints(self, endpoints: Arc<dyn RemoteEndpoints>) -> Self {
        self.with_optimizer(Arc::new(PassthroughOptimizer::new(endpoints)))
    }

    /// Append an optimizer; optimizers run in the order they were added
    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizers.push(optimizer);
        self
    }

    /// Engine options
    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    fn query_options(&self, opts: QueryOptions) -> QueryOptions {
        opts.with_lookback_delta(self.opts.lookback_delta_ms)
            .with_steps_batch(self.opts.steps_batch)
            .with_analysis(self.opts.enable_analysis)
    }

    /// Prepare a range query over `[start, end]` every `step` milliseconds
    pub fn new_range_query(
        &self,
        storage: Arc<dyn Storage>,
        plan: Node,
        start: i64,
        end: i64,
        step: i64,
    ) -> Result<RangeQuery> {
        let opts = self.query_options(QueryOptions::range(start, end, step)?);
        let prepared = self.prepare(storage, plan, opts)?;
        Ok(RangeQuery {
            prepared,
            timeout: self.opts.timeout,
        })
    }

    /// Prepare an instant query at `t`
    pub fn new_instant_query(&self, storage: Arc<dyn Storage>, plan: Node, t: i64) -> Result<InstantQuery> {
        let opts = self.query_options(QueryOptions::instant(t));
        let prepared = self.prepare(storage, plan, opts)?;
        Ok(InstantQuery {
            prepared,
            timeout: self.opts.timeout,
        })
    }

    /// Plan and run `plan` with caller-provided options, returning a matrix
    ///
    /// Used to answer queries delegated by another engine.
    pub fn evaluate_plan(
        &self,
        ctx: &ExecutionContext,
        storage: Arc<dyn Storage>,
        plan: Node,
        opts: QueryOptions,
    ) -> Result<Vec<Series>> {
        let opts = opts.with_steps_batch(self.opts.steps_batch);
        let mut prepared = self.prepare(storage, plan, opts)?;
        let ctx = ctx.clone().with_timeout(self.opts.timeout);
        for warning in prepared.annotations.iter() {
            ctx.add_warning(warning);
        }
        QueryExecutor::new().execute_range(prepared.root.as_mut(), &ctx)
    }

    fn prepare(&self, storage: Arc<dyn Storage>, plan: Node, opts: QueryOptions) -> Result<Prepared> {
        let mut plan = plan;
        let mut annotations = Annotations::new();
        for optimizer in &self.optimizers {
            let (optimized, annos) = optimizer.optimize(plan, &opts);
            plan = optimized;
            annotations.merge(annos);
        }

        let pool = Arc::new(VectorPool::with_max_retained(
            opts.steps_batch,
            self.opts.pool_max_retained,
        ));
        let lowering = LoweringConfig {
            decoding_concurrency: self.opts.decoding_concurrency,
            concurrent_buffer_size: self.opts.concurrent_buffer_size,
        };
        let root = PhysicalPlanner::new(storage, Arc::clone(&pool), opts, lowering).lower(&plan)?;
        tracing::debug!(plan = %plan, start = opts.start, end = opts.end, step = opts.step, "query prepared");

        Ok(Prepared {
            plan,
            opts,
            root,
            pool,
            annotations,
            executed: false,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("opts", &self.opts)
            .field("optimizers", &self.optimizers.len())
            .finish()
    }
}

// ============================================================================
// Queries
// ============================================================================

/// A planned query ready to run
pub trait ExecutableQuery: Send {
    /// Run the query to completion
    ///
    /// A query runs once; later calls fail with a validation error.
    fn exec(&mut self, ctx: &ExecutionContext) -> Result<QueryResult>;

    /// Operator tree without timings
    fn explain(&self) -> ExplainOutputNode;

    /// Operator tree with timings and sample counts, when analysis is on
    fn analyze(&self) -> Option<AnalyzeOutputNode>;

    /// Optimized logical plan
    fn plan(&self) -> &Node;

    /// Evaluation options
    fn options(&self) -> &QueryOptions;
}

struct Prepared {
    plan: Node,
    opts: QueryOptions,
    root: BoxedOperator,
    pool: Arc<VectorPool>,
    annotations: Annotations,
    executed: bool,
}

impl Prepared {
    fn begin(&mut self, ctx: &ExecutionContext, timeout: Duration) -> Result<ExecutionContext> {
        if self.executed {
            return Err(QueryError::validation("query has already been executed"));
        }
        self.executed = true;
        Ok(ctx.clone().with_timeout(timeout))
    }

    fn finish(
        &self,
        kind: &str,
        ctx: &ExecutionContext,
        started: Instant,
        result: Result<QueryResult>,
    ) -> Result<QueryResult> {
        let elapsed = started.elapsed();
        metrics::record_query(kind, elapsed.as_secs_f64(), result.is_ok());

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(kind, plan = %self.plan, error = %e, "query failed");
                return Err(e);
            },
        };

        let mut warnings = self.annotations.clone();
        warnings.merge(ctx.warnings());
        let pool = self.pool.stats();
        tracing::debug!(
            kind,
            elapsed_us = elapsed.as_micros() as u64,
            pool_reuse_ratio = pool.reuse_ratio(),
            warnings = warnings.len(),
            "query finished"
        );
        Ok(result
            .with_execution_time(elapsed)
            .with_warnings(warnings.into_vec()))
    }

    fn analyze(&self) -> Option<AnalyzeOutputNode> {
        self.opts
            .enable_analysis
            .then(|| AnalyzeOutputNode::from(&self.root.explain()))
    }
}

/// Query evaluated at every step of a range
pub struct RangeQuery {
    prepared: Prepared,
    timeout: Duration,
}

impl ExecutableQuery for RangeQuery {
    fn exec(&mut self, ctx: &ExecutionContext) -> Result<QueryResult> {
        let ctx = self.prepared.begin(ctx, self.timeout)?;
        let _in_flight = InFlightGuard::start();
        let started = Instant::now();
        let result = QueryExecutor::new()
            .execute_range(self.prepared.root.as_mut(), &ctx)
            .map(QueryResult::matrix);
        self.prepared.finish("range", &ctx, started, result)
    }

    fn explain(&self) -> ExplainOutputNode {
        ExplainOutputNode::from(&self.prepared.root.explain())
    }

    fn analyze(&self) -> Option<AnalyzeOutputNode> {
        self.prepared.analyze()
    }

    fn plan(&self) -> &Node {
        &self.prepared.plan
    }

    fn options(&self) -> &QueryOptions {
        &self.prepared.opts
    }
}

/// Query evaluated at a single timestamp
pub struct InstantQuery {
    prepared: Prepared,
    timeout: Duration,
}

impl ExecutableQuery for InstantQuery {
    fn exec(&mut self, ctx: &ExecutionContext) -> Result<QueryResult> {
        let ctx = self.prepared.begin(ctx, self.timeout)?;
        let _in_flight = InFlightGuard::start();
        let started = Instant::now();
        let result = QueryExecutor::new()
            .execute_instant(self.prepared.root.as_mut(), &ctx)
            .map(QueryResult::vector);
        self.prepared.finish("instant", &ctx, started, result)
    }

    fn explain(&self) -> ExplainOutputNode {
        ExplainOutputNode::from(&self.prepared.root.explain())
    }

    fn analyze(&self) -> Option<AnalyzeOutputNode> {
        self.prepared.analyze()
    }

    fn plan(&self) -> &Node {
        &self.prepared.plan
    }

    fn options(&self) -> &QueryOptions {
        &self.prepared.opts
    }
}

// ============================================================================
// Explain / Analyze output
// ============================================================================

/// Operator tree as returned by `explain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainOutputNode {
    /// Operator descriptor
    pub operator_name: String,
    /// Child operators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExplainOutputNode>,
}

impl ExplainOutputNode {
    /// Leaf node
    pub fn leaf(operator_name: impl Into<String>) -> Self {
        Self {
            operator_name: operator_name.into(),
            children: Vec::new(),
        }
    }
}

impl From<&Explanation> for ExplainOutputNode {
    fn from(e: &Explanation) -> Self {
        Self {
            operator_name: e.operator.clone(),
            children: e.children.iter().map(ExplainOutputNode::from).collect(),
        }
    }
}

/// Operator tree with recorded telemetry as returned by `analyze`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeOutputNode {
    /// Operator descriptor
    pub operator_name: String,
    /// Time spent inside the operator and its subtree
    pub execution_time_ns: u64,
    /// Largest number of samples produced at one step
    pub peak_samples: i64,
    /// Samples produced across all steps
    pub total_samples: i64,
    /// Child operators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AnalyzeOutputNode>,
}

impl AnalyzeOutputNode {
    /// Recorded execution time
    pub fn execution_time(&self) -> Duration {
        Duration::from_nanos(self.execution_time_ns)
    }
}

impl From<&Explanation> for AnalyzeOutputNode {
    fn from(e: &Explanation) -> Self {
        let telemetry = e.telemetry.clone().unwrap_or_default();
        Self {
            operator_name: e.operator.clone(),
            execution_time_ns: telemetry.execution_time.as_nanos() as u64,
            peak_samples: telemetry.samples.peak_samples,
            total_samples: telemetry.samples.total_samples,
            children: e.children.iter().map(AnalyzeOutputNode::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::AggregateOp;
    use crate::storage::MemoryStorage;
    use crate::types::Labels;

    fn storage() -> Arc<dyn Storage> {
        let s = MemoryStorage::new();
        for (job, base) in [("api", 1.0), ("db", 10.0)] {
            let lset = Labels::from_pairs(&[("__name__", "up"), ("job", job)]);
            let samples: Vec<(i64, f64)> = (0..10).map(|i| (i * 10_000, base + i as f64)).collect();
            s.add_series(&lset, &samples).unwrap();
        }
        Arc::new(s)
    }

    fn engine(analysis: bool) -> Engine {
        Engine::new(EngineOpts {
            enable_analysis: analysis,
            decoding_concurrency: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_range_query() {
        let mut q = engine(false)
            .new_range_query(storage(), Node::selector("up"), 0, 90_000, 30_000)
            .unwrap();
        let result = q.exec(&ExecutionContext::new()).unwrap();
        let matrix = result.as_matrix().unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].metric.get("job"), Some("api"));
        let values: Vec<f64> = matrix[0].points.iter().map(|p| p.v).collect();
        assert_eq!(values, vec![1.0, 4.0, 7.0, 10.0]);
        assert_eq!(result.metadata.point_count, 8);
    }

    #[test]
    fn test_instant_query_sorted_by_value() {
        let plan = Node::aggregate(AggregateOp::Sum, Node::selector("up"), &["job"]);
        let mut q = engine(false).new_instant_query(storage(), plan, 50_000).unwrap();
        let result = q.exec(&ExecutionContext::new()).unwrap();
        let vector = result.as_vector().unwrap();
        let values: Vec<f64> = vector.iter().map(|s| s.v).collect();
        assert_eq!(values, vec![6.0, 15.0]);
        assert_eq!(vector[0].metric, Labels::from_pairs(&[("job", "api")]));
    }

    #[test]
    fn test_exec_twice_fails() {
        let mut q = engine(false).new_instant_query(storage(), Node::selector("up"), 0).unwrap();
        q.exec(&ExecutionContext::new()).unwrap();
        assert!(q.exec(&ExecutionContext::new()).is_err());
    }

    #[test]
    fn test_analyze_only_when_enabled() {
        let mut q = engine(false).new_instant_query(storage(), Node::selector("up"), 0).unwrap();
        q.exec(&ExecutionContext::new()).unwrap();
        assert!(q.analyze().is_none());

        let mut q = engine(true).new_instant_query(storage(), Node::selector("up"), 0).unwrap();
        q.exec(&ExecutionContext::new()).unwrap();
        let analysis = q.analyze().unwrap();
        assert_eq!(analysis.operator_name, "[coalesce]");
        assert!(analysis.execution_time_ns > 0);
        assert_eq!(analysis.total_samples, 2);
    }

    #[test]
    fn test_planning_error_surfaces() {
        let plan = Node::call("nope", vec![]);
        let err = engine(false).new_instant_query(storage(), plan, 0).err().unwrap();
        assert_eq!(err.kind, crate::query::error::QueryErrorKind::Planning);
    }

    #[test]
    fn test_explain_serializes() {
        let node = ExplainOutputNode {
            operator_name: "[coalesce]".into(),
            children: vec![ExplainOutputNode::leaf("[vectorSelector] {[]} 0 mod 1")],
        };
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"operator_name\":\"[coalesce]\""));
        let back: ExplainOutputNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
