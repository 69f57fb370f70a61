//! Remote backends and the registry the optimizer consults
//!
//! A backend describes what it can answer (a time window plus label sets)
//! and how to answer a delegated sub-plan. Transport is the backend's own
//! business; the engine only sees series coming back.

use crate::query::engine::Engine;
use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::query::options::QueryOptions;
use crate::query::plan::Node;
use crate::query::result::Series;
use crate::storage::Storage;
use crate::types::Labels;
use std::sync::Arc;

/// A backend that can evaluate a delegated sub-plan
pub trait RemoteEngine: Send + Sync {
    /// Name used in logs and explain output
    fn name(&self) -> &str;

    /// Earliest timestamp covered, in milliseconds
    fn min_t(&self) -> i64;

    /// Latest timestamp covered, in milliseconds
    fn max_t(&self) -> i64;

    /// Series subsets this backend answers for (empty = unconstrained)
    fn label_sets(&self) -> &[Labels];

    /// Evaluate `query` over the window and step in `opts`
    ///
    /// Returned series must carry one point per evaluated step at most and
    /// points must be in ascending timestamp order.
    fn execute(&self, ctx: &ExecutionContext, query: &Node, opts: &QueryOptions) -> Result<Vec<Series>>;
}

/// Registry of candidate backends
pub trait RemoteEndpoints: Send + Sync {
    /// Backends in registration order
    fn engines(&self) -> Vec<Arc<dyn RemoteEngine>>;
}

/// Fixed list of backends
#[derive(Clone, Default)]
pub struct StaticEndpoints {
    engines: Vec<Arc<dyn RemoteEngine>>,
}

impl StaticEndpoints {
    /// Create a registry from a list of backends
    pub fn new(engines: Vec<Arc<dyn RemoteEngine>>) -> Self {
        Self { engines }
    }

    /// Register another backend
    pub fn push(&mut self, engine: Arc<dyn RemoteEngine>) {
        self.engines.push(engine);
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Check if no backend is registered
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl RemoteEndpoints for StaticEndpoints {
    fn engines(&self) -> Vec<Arc<dyn RemoteEngine>> {
        self.engines.clone()
    }
}

// ============================================================================
// In-process backend
// ============================================================================

/// Backend answering delegated plans with a local engine over its own storage
///
/// Useful for federating several storages in one process and as a reference
/// backend in tests.
pub struct InProcessEngine {
    name: String,
    engine: Engine,
    storage: Arc<dyn Storage>,
    min_t: i64,
    max_t: i64,
    label_sets: Vec<Labels>,
}

impl InProcessEngine {
    /// Create a backend covering `[min_t, max_t]` for the given label sets
    pub fn new(
        name: impl Into<String>,
        engine: Engine,
        storage: Arc<dyn Storage>,
        min_t: i64,
        max_t: i64,
        label_sets: Vec<Labels>,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            storage,
            min_t,
            max_t,
            label_sets,
        }
    }
}

impl RemoteEngine for InProcessEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_t(&self) -> i64 {
        self.min_t
    }

    fn max_t(&self) -> i64 {
        self.max_t
    }

    fn label_sets(&self) -> &[Labels] {
        &self.label_sets
    }

    fn execute(&self, ctx: &ExecutionContext, query: &Node, opts: &QueryOptions) -> Result<Vec<Series>> {
        tracing::debug!(backend = %self.name, query = %query, "answering delegated query");
        self.engine
            .evaluate_plan(ctx, Arc::clone(&self.storage), query.clone(), *opts)
    }
}
