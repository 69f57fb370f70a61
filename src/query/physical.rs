//! Physical planning - lowers a logical plan into an operator tree
//!
//! ```text
//! Node::VectorSelector        coalesce
//!                              ├─ concurrent(buff) ─ vectorSelector 0 mod n
//!                              └─ concurrent(buff) ─ vectorSelector 1 mod n
//!
//! Node::Aggregation           concurrent(buff) ─ aggregate ─ <expr>
//!
//! histogram_quantile(q, v)    histogramQuantile ─ <q>, <v>
//! ```
//!
//! Binary expressions lower to a scalar-binary operator when one side is a
//! scalar (a literal, `time()`, or arithmetic over those) and to a
//! one-to-one vector-binary operator otherwise. Every operator is wrapped in
//! a telemetry decorator; with analysis disabled the decorator records
//! nothing.

use crate::query::error::{QueryError, Result};
use crate::query::operators::{
    AggregateOperator, BoxedOperator, CoalesceOperator, ConcurrentOperator, HistogramQuantileOperator,
    NumberLiteralOperator, Observed, RemoteExecutionOperator, ScalarBinaryOperator, TimeOperator,
    VectorBinaryOperator, VectorPool, VectorSelectorOperator,
};
use crate::query::options::QueryOptions;
use crate::query::plan::{Aggregation, Binary, FunctionCall, Node, VectorSelector};
use crate::storage::Storage;
use std::sync::Arc;

/// Knobs that shape the operator tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Number of selector shards
    pub decoding_concurrency: usize,
    /// Batches buffered by each concurrent operator
    pub concurrent_buffer_size: usize,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            decoding_concurrency: (num_cpus::get() / 2).max(1),
            concurrent_buffer_size: crate::query::operators::concurrent::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Whether `node` evaluates to a single unlabelled value per step
pub fn is_scalar(node: &Node) -> bool {
    match node {
        Node::NumberLiteral(_) => true,
        Node::Call(call) => call.name == "time" && call.args.is_empty(),
        Node::Binary(b) => is_scalar(&b.lhs) && is_scalar(&b.rhs),
        _ => false,
    }
}

/// Builds operator trees for one query
pub struct PhysicalPlanner {
    storage: Arc<dyn Storage>,
    pool: Arc<VectorPool>,
    opts: QueryOptions,
    config: LoweringConfig,
}

impl PhysicalPlanner {
    /// Create a planner; every operator it builds shares `pool`
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: Arc<VectorPool>,
        opts: QueryOptions,
        config: LoweringConfig,
    ) -> Self {
        Self {
            storage,
            pool,
            opts,
            config,
        }
    }

    /// Lower `plan` into an operator tree
    pub fn lower(&self, plan: &Node) -> Result<BoxedOperator> {
        let op = match plan {
            Node::VectorSelector(selector) => self.lower_selector(selector),
            Node::NumberLiteral(v) => self.observe(
                Box::new(NumberLiteralOperator::new(Arc::clone(&self.pool), self.opts, *v)),
                "[numberLiteral]",
            ),
            Node::Aggregation(aggregation) => self.lower_aggregation(aggregation)?,
            Node::Binary(binary) => self.lower_binary(binary)?,
            Node::Call(call) => self.lower_call(call)?,
            Node::RemoteExecution(remote) => self.observe(
                Box::new(RemoteExecutionOperator::new(
                    Arc::clone(&remote.engine),
                    (*remote.query).clone(),
                    Arc::clone(&self.pool),
                    self.opts,
                    remote.query_range_start,
                    remote.query_range_end,
                )),
                "[remoteExec]",
            ),
        };
        Ok(op)
    }

    fn observe(&self, op: BoxedOperator, name: &str) -> BoxedOperator {
        Observed::wrap(op, name, self.opts.enable_analysis)
    }

    fn concurrent(&self, op: BoxedOperator) -> BoxedOperator {
        self.observe(
            Box::new(ConcurrentOperator::new(op, self.config.concurrent_buffer_size)),
            "[concurrent]",
        )
    }

    fn lower_selector(&self, selector: &VectorSelector) -> BoxedOperator {
        let shards = self.config.decoding_concurrency.max(1);
        tracing::debug!(selector = %selector, shards, "lowering selector");
        let children = (0..shards)
            .map(|shard| {
                let op = VectorSelectorOperator::new(
                    Arc::clone(&self.storage),
                    selector.clone(),
                    Arc::clone(&self.pool),
                    self.opts,
                    shard,
                    shards,
                );
                self.concurrent(self.observe(Box::new(op), "[vectorSelector]"))
            })
            .collect();
        self.observe(
            Box::new(CoalesceOperator::new(Arc::clone(&self.pool), children)),
            "[coalesce]",
        )
    }

    fn lower_aggregation(&self, aggregation: &Aggregation) -> Result<BoxedOperator> {
        let child = self.lower(&aggregation.expr)?;
        let op = AggregateOperator::new(
            child,
            Arc::clone(&self.pool),
            aggregation.op,
            aggregation.grouping.clone(),
            aggregation.without,
        );
        Ok(self.concurrent(self.observe(Box::new(op), "[aggregate]")))
    }

    fn lower_binary(&self, binary: &Binary) -> Result<BoxedOperator> {
        let (lhs_scalar, rhs_scalar) = (is_scalar(&binary.lhs), is_scalar(&binary.rhs));
        if lhs_scalar && rhs_scalar && binary.op.is_comparison() && !binary.return_bool {
            return Err(QueryError::planning(
                "comparisons between scalars must use BOOL modifier",
            ));
        }

        let lhs = self.lower(&binary.lhs)?;
        let rhs = self.lower(&binary.rhs)?;
        let pool = Arc::clone(&self.pool);
        let op: BoxedOperator = match (lhs_scalar, rhs_scalar) {
            (true, false) => Box::new(ScalarBinaryOperator::new(
                rhs,
                lhs,
                pool,
                binary.op,
                binary.return_bool,
                true,
            )),
            (_, true) => Box::new(ScalarBinaryOperator::new(
                lhs,
                rhs,
                pool,
                binary.op,
                binary.return_bool,
                false,
            )),
            (false, false) => Box::new(VectorBinaryOperator::new(
                lhs,
                rhs,
                pool,
                binary.op,
                binary.return_bool,
            )),
        };
        Ok(self.observe(op, "[binary]"))
    }

    fn lower_call(&self, call: &FunctionCall) -> Result<BoxedOperator> {
        match (call.name.as_str(), call.args.as_slice()) {
            ("time", []) => Ok(self.observe(
                Box::new(TimeOperator::new(Arc::clone(&self.pool), self.opts)),
                "[noArgFunction]",
            )),
            ("histogram_quantile", [q, vector]) => {
                if !is_scalar(q) {
                    return Err(QueryError::planning(
                        "histogram_quantile expects a scalar as its first argument",
                    ));
                }
                let op = HistogramQuantileOperator::new(
                    self.lower(q)?,
                    self.lower(vector)?,
                    Arc::clone(&self.pool),
                );
                Ok(self.observe(Box::new(op), "[histogramQuantile]"))
            },
            ("time", args) | ("histogram_quantile", args) => Err(QueryError::planning(format!(
                "wrong number of arguments for {}: got {}",
                call.name,
                args.len()
            ))),
            (name, _) => Err(QueryError::planning(format!("unknown function {:?}", name))),
        }
    }
}
