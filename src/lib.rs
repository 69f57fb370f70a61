//! Stepwise - vectorized, step-wise time-series query engine
//!
//! This library evaluates PromQL-style logical plans with:
//! - Pull-based operators producing batches of step vectors
//! - Sharded selectors pulled concurrently with bounded read-ahead
//! - A passthrough optimizer delegating whole queries to a remote backend
//! - Histogram quantile estimation with bucket repair
//! - Per-operator telemetry for explain/analyze

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query planning, optimization and execution
pub mod query;

// Re-export main types
pub use config::{Config, EngineConfig};
pub use error::{Error, Result};
pub use query::{Engine, EngineOpts, ExecutableQuery, ExecutionContext, Node, QueryOptions};
pub use types::{Labels, Matcher, SeriesId, TimeRange};
