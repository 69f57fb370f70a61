//! Query Executor - drains an operator tree into a result
//!
//! The executor pulls step batches from the root operator until it is
//! exhausted, folding every sample into a per-series accumulator indexed by
//! series id. Buffers go back to the pool as soon as a step is consumed.
//!
//! ```text
//! ┌─────────────────┐
//! │  QueryExecutor  │  ← per-series accumulators, sorting
//! └────────┬────────┘
//!          │ next() → [StepVector; ≤ steps_batch]
//! ┌────────▼────────┐
//! │  root operator  │
//! └─────────────────┘
//! ```
//!
//! Any error from the tree aborts assembly; whatever was accumulated up to
//! that point is dropped with the error.

use crate::query::annotations::Annotations;
use crate::query::error::{QueryError, Result};
use crate::query::operators::VectorOperator;
use crate::query::result::{sort_matrix, sort_vector, Sample, Series};
use crate::types::Point;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Execution Context
// ============================================================================

/// Context passed through the execution pipeline
///
/// Clones share the cancellation flag and the warning sink, so a clone can
/// be handed to another thread (or kept by the caller) to cancel a running
/// query.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Context creation time
    pub start_time: Instant,

    /// Point after which the query times out
    deadline: Option<Instant>,

    /// Shared cancellation flag
    cancelled: Arc<AtomicBool>,

    /// Warnings raised by operators
    warnings: Arc<Mutex<Annotations>>,
}

impl ExecutionContext {
    /// Create a context without deadline
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            warnings: Arc::new(Mutex::new(Annotations::new())),
        }
    }

    /// Bound the context by `timeout` from now
    ///
    /// An earlier existing deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Cancel execution
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if execution was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Check if the deadline has passed
    pub fn is_timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Get remaining time before the deadline
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the query was cancelled or timed out
    ///
    /// Operators call this at least once per step.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(QueryError::cancelled("query was cancelled"));
        }
        if self.is_timed_out() {
            return Err(QueryError::timeout("query timed out"));
        }
        Ok(())
    }

    /// Record a non-fatal warning
    pub fn add_warning(&self, message: impl Into<String>) {
        self.warnings.lock().add(message);
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> Annotations {
        self.warnings.lock().clone()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// Drives operator trees to completion
#[derive(Debug, Default)]
pub struct QueryExecutor {
    stats: ExecutionStats,
}

impl QueryExecutor {
    /// Create a new query executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `root` into a matrix ordered by labels
    pub fn execute_range(&mut self, root: &mut dyn VectorOperator, ctx: &ExecutionContext) -> Result<Vec<Series>> {
        let start = Instant::now();
        let series = root.series(ctx)?;
        let mut acc: Vec<Option<Series>> = vec![None; series.len()];
        let mut steps = 0u64;
        let mut samples = 0u64;

        while let Some(mut batch) = root.next(ctx)? {
            for vector in batch.drain(..) {
                steps += 1;
                samples += vector.len() as u64;
                for (id, v) in vector.iter() {
                    let slot = acc.get_mut(id as usize).ok_or_else(|| {
                        QueryError::internal(format!(
                            "sample references series id {} but operator declared {} series",
                            id,
                            series.len()
                        ))
                    })?;
                    slot.get_or_insert_with(|| Series::new(series[id as usize].clone()))
                        .points
                        .push(Point::new(vector.t, v));
                }
                root.pool().put_step_vector(vector);
            }
            root.pool().put_vectors(batch);
        }

        let mut result: Vec<Series> = acc.into_iter().flatten().collect();
        sort_matrix(&mut result);

        self.record(start.elapsed(), steps, samples, result.len());
        tracing::debug!(
            series = result.len(),
            steps,
            samples,
            "range query assembled"
        );
        Ok(result)
    }

    /// Drain `root` into a vector ordered by value
    ///
    /// The tree is expected to produce a single step; should it produce
    /// more, later steps overwrite earlier samples of the same series.
    pub fn execute_instant(&mut self, root: &mut dyn VectorOperator, ctx: &ExecutionContext) -> Result<Vec<Sample>> {
        let start = Instant::now();
        let series = root.series(ctx)?;
        let mut acc: Vec<Option<Sample>> = vec![None; series.len()];
        let mut steps = 0u64;
        let mut samples = 0u64;

        while let Some(mut batch) = root.next(ctx)? {
            for vector in batch.drain(..) {
                steps += 1;
                samples += vector.len() as u64;
                for (id, v) in vector.iter() {
                    let Some(labels) = series.get(id as usize) else {
                        return Err(QueryError::internal(format!(
                            "sample references series id {} but operator declared {} series",
                            id,
                            series.len()
                        )));
                    };
                    acc[id as usize] = Some(Sample {
                        metric: labels.clone(),
                        t: vector.t,
                        v,
                    });
                }
                root.pool().put_step_vector(vector);
            }
            root.pool().put_vectors(batch);
        }

        let mut result: Vec<Sample> = acc.into_iter().flatten().collect();
        sort_vector(&mut result);

        self.record(start.elapsed(), steps, samples, result.len());
        tracing::debug!(series = result.len(), steps, samples, "instant query assembled");
        Ok(result)
    }

    fn record(&mut self, elapsed: Duration, steps: u64, samples: u64, series: usize) {
        self.stats.total_queries += 1;
        self.stats.total_execution_time += elapsed;
        self.stats.steps_processed += steps;
        self.stats.samples_processed += samples;
        self.stats.series_returned += series as u64;
    }

    /// Get current execution statistics
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Reset execution statistics
    pub fn reset_stats(&mut self) {
        self.stats = ExecutionStats::default();
    }
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Statistics collected by an executor across successful queries
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Number of queries assembled
    pub total_queries: u64,

    /// Total assembly time
    pub total_execution_time: Duration,

    /// Steps consumed from root operators
    pub steps_processed: u64,

    /// Samples consumed from root operators
    pub samples_processed: u64,

    /// Series in assembled results
    pub series_returned: u64,
}

impl ExecutionStats {
    /// Calculate average query latency
    pub fn avg_query_latency(&self) -> Duration {
        if self.total_queries == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time / self.total_queries.min(u32::MAX as u64) as u32
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
