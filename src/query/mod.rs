//! Step-wise query engine
//!
//! Queries arrive as logical plans ([`plan::Node`]). The engine runs its
//! optimizers over the plan, lowers the result into a tree of vector
//! operators and pulls batches of step vectors from the root until the
//! tree is exhausted.
//!
//! # Architecture
//!
//! ```text
//! Logical plan
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Optimize   │  Passthrough: delegate to a single owning backend
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Lower     │  Node → VectorOperator tree
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  Pull step batches, assemble series
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Format     │  JSON, CSV
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stepwise::query::{Engine, EngineOpts, ExecutableQuery, ExecutionContext, Node};
//! use stepwise::storage::{MemoryStorage, Storage};
//! use stepwise::types::Labels;
//!
//! let storage = MemoryStorage::new();
//! let up = Labels::from_pairs(&[("__name__", "up"), ("job", "api")]);
//! storage.add_series(&up, &[(0, 1.0), (15_000, 1.0)]).unwrap();
//! let storage: Arc<dyn Storage> = Arc::new(storage);
//!
//! let engine = Engine::new(EngineOpts::default());
//! let mut query = engine
//!     .new_range_query(storage, Node::selector("up"), 0, 30_000, 15_000)
//!     .unwrap();
//! let result = query.exec(&ExecutionContext::new()).unwrap();
//! assert_eq!(result.as_matrix().unwrap()[0].points.len(), 3);
//! ```

pub mod annotations;
pub mod engine;
pub mod error;
pub mod executor;
pub mod histogram;
pub mod operators;
pub mod optimizer;
pub mod options;
pub mod physical;
pub mod plan;
pub mod remote;
pub mod result;

// Re-export main types
pub use annotations::Annotations;
pub use engine::{
    AnalyzeOutputNode, Engine, EngineOpts, ExecutableQuery, ExplainOutputNode, InstantQuery,
    RangeQuery,
};
pub use error::{QueryError, QueryErrorKind};
pub use executor::{ExecutionContext, QueryExecutor};
pub use histogram::{bucket_quantile, histogram_stddev, histogram_stdvar, Bucket, BucketRepair};
pub use operators::{BoxedOperator, StepVector, VectorOperator, VectorPool};
pub use optimizer::{label_sets_match, matching_engine_time, Optimizer, PassthroughOptimizer};
pub use options::QueryOptions;
pub use plan::{AggregateOp, BinaryOp, Node};
pub use remote::{InProcessEngine, RemoteEndpoints, RemoteEngine, StaticEndpoints};
pub use result::{QueryResult, ResultFormat, Sample, Series};
