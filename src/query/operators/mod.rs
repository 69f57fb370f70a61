//! Query Operators - Step-wise vectorized execution primitives
//!
//! Every operator implements the same pull contract, [`VectorOperator`]:
//! - `next` yields a batch of [`StepVector`]s (one per evaluation timestamp)
//!   or `None` once exhausted, and keeps returning `None` afterwards
//! - `series` lists the output label sets indexed by series id
//! - `pool` exposes the query's shared [`VectorPool`] for buffer recycling
//! - `explain` describes the operator and its children without executing
//!
//! Operators form a tree mirroring the logical plan:
//!
//! ```text
//!   concurrent(buff=2)
//!          │
//!      aggregate           ← groups input ids into output ids
//!          │
//!      coalesce            ← concatenates shard id spaces
//!     ┌────┴────┐
//!  concurrent  concurrent
//!     │           │
//!  selector    selector    ← shard 0 mod 2, shard 1 mod 2
//! ```
//!
//! Samples inside a step vector are columnar: parallel `sample_ids` and
//! `samples` columns. Consumers hand buffers back to the pool as soon as a
//! step has been consumed.

pub mod aggregation;
pub mod binary;
pub mod coalesce;
pub mod concurrent;
pub mod histogram_quantile;
pub mod literal;
pub mod pool;
pub mod remote;
pub mod selector;
pub mod telemetry;

pub use aggregation::AggregateOperator;
pub use binary::{ScalarBinaryOperator, VectorBinaryOperator};
pub use coalesce::CoalesceOperator;
pub use concurrent::ConcurrentOperator;
pub use histogram_quantile::HistogramQuantileOperator;
pub use literal::{NumberLiteralOperator, TimeOperator};
pub use pool::{PoolStats, VectorPool};
pub use remote::RemoteExecutionOperator;
pub use selector::VectorSelectorOperator;
pub use telemetry::{
    new_telemetry, NoopTelemetry, Observed, OperatorTelemetry, QuerySamples, TelemetrySnapshot,
    TrackedTelemetry,
};

use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::query::options::QueryOptions;
use crate::types::{Labels, SeriesId};
use std::sync::Arc;

// ============================================================================
// Step Vector
// ============================================================================

/// Samples of all contributing series at one evaluation timestamp
///
/// `sample_ids[i]` is the series id of `samples[i]`. Order within a step
/// carries no meaning beyond that pairing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepVector {
    /// Evaluation timestamp in milliseconds
    pub t: i64,

    /// Series id column
    pub sample_ids: Vec<SeriesId>,

    /// Value column
    pub samples: Vec<f64>,
}

impl StepVector {
    /// Create an empty step vector for timestamp `t`
    pub fn new(t: i64) -> Self {
        Self {
            t,
            sample_ids: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Append a sample
    #[inline]
    pub fn push(&mut self, id: SeriesId, value: f64) {
        self.sample_ids.push(id);
        self.samples.push(value);
    }

    /// Number of samples
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if no series contributed a sample
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate `(id, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (SeriesId, f64)> + '_ {
        self.sample_ids.iter().copied().zip(self.samples.iter().copied())
    }
}

// ============================================================================
// Operator Trait
// ============================================================================

/// Pull-based step-wise operator
pub trait VectorOperator: Send {
    /// Pull the next batch of steps
    ///
    /// Returns:
    /// - `Ok(Some(steps))` - one or more steps in ascending timestamp order
    /// - `Ok(None)` - exhausted; repeated calls keep returning `None`
    /// - `Err(e)` - fatal to the whole query
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>>;

    /// Output label sets indexed by series id
    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>>;

    /// Pool shared by this subtree
    fn pool(&self) -> &Arc<VectorPool>;

    /// Describe this operator and its children without executing
    fn explain(&self) -> Explanation;
}

/// Owned operator trait object
pub type BoxedOperator = Box<dyn VectorOperator>;

/// Structural description of an operator subtree
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    /// Operator descriptor, e.g. `[coalesce]`
    pub operator: String,

    /// Direct children
    pub children: Vec<Explanation>,

    /// Recorded telemetry when the operator is observed
    pub telemetry: Option<TelemetrySnapshot>,
}

impl Explanation {
    /// Leaf explanation
    pub fn leaf(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            children: Vec::new(),
            telemetry: None,
        }
    }

    /// Explanation with children
    pub fn with_children(operator: impl Into<String>, children: Vec<Explanation>) -> Self {
        Self {
            operator: operator.into(),
            children,
            telemetry: None,
        }
    }
}

/// Return every buffer of a consumed batch to the pool
pub(crate) fn recycle(pool: &VectorPool, mut batch: Vec<StepVector>) {
    for vector in batch.drain(..) {
        pool.put_step_vector(vector);
    }
    pool.put_vectors(batch);
}

// ============================================================================
// Step Walker
// ============================================================================

/// Walks the evaluation steps of a query in batches
///
/// Leaf operators use it to emit one step vector per evaluation timestamp,
/// at most `steps_batch` per call. Cancellation is checked before every step.
#[derive(Debug, Clone)]
pub(crate) struct Steps {
    opts: QueryOptions,
    current: usize,
}

impl Steps {
    pub(crate) fn new(opts: QueryOptions) -> Self {
        Self { opts, current: 0 }
    }

    /// Build the next batch, letting `fill` add samples to each step
    pub(crate) fn next_batch(
        &mut self,
        pool: &VectorPool,
        ctx: &ExecutionContext,
        mut fill: impl FnMut(&mut StepVector),
    ) -> Result<Option<Vec<StepVector>>> {
        let num_steps = self.opts.num_steps();
        if self.current >= num_steps {
            return Ok(None);
        }

        let end = self.current.saturating_add(self.opts.steps_batch).min(num_steps);
        let mut batch = pool.get_vectors();
        for step in self.current..end {
            ctx.check()?;
            let mut vector = pool.get_step_vector(self.opts.step_timestamp(step));
            fill(&mut vector);
            batch.push(vector);
        }
        self.current = end;
        Ok(Some(batch))
    }
}

// ============================================================================
// Numeric Utilities
// ============================================================================

/// Numerically stable algorithms for aggregation
pub mod numeric {
    /// Welford's online algorithm for mean and variance
    ///
    /// Provides numerically stable computation of mean and variance
    /// in a single pass through the data.
    #[derive(Debug, Clone, Default)]
    pub struct WelfordState {
        /// Number of values seen
        pub count: u64,
        /// Running mean
        pub mean: f64,
        /// Sum of squared differences from mean (M2)
        pub m2: f64,
    }

    impl WelfordState {
        /// Create a new state
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a value to the computation
        #[inline]
        pub fn add(&mut self, value: f64) {
            self.count += 1;
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }

        /// Get the population variance
        #[inline]
        pub fn variance_population(&self) -> f64 {
            if self.count == 0 {
                0.0
            } else {
                self.m2 / self.count as f64
            }
        }

        /// Get the population standard deviation
        #[inline]
        pub fn stddev_population(&self) -> f64 {
            self.variance_population().sqrt()
        }
    }

    /// Compensated floating-point sum
    ///
    /// Neumaier's variant of Kahan summation: the compensation also holds
    /// when an added term is larger than the running sum. The compensation
    /// is dropped once the sum overflows to infinity.
    #[derive(Debug, Clone, Default)]
    pub struct KahanSum {
        sum: f64,
        compensation: f64,
    }

    impl KahanSum {
        /// Create a new sum accumulator
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a value to the sum
        #[inline]
        pub fn add(&mut self, value: f64) {
            let t = self.sum + value;
            if t.is_infinite() {
                self.compensation = 0.0;
            } else if self.sum.abs() >= value.abs() {
                self.compensation += (self.sum - t) + value;
            } else {
                self.compensation += (value - t) + self.sum;
            }
            self.sum = t;
        }

        /// Get the current sum
        #[inline]
        pub fn sum(&self) -> f64 {
            self.sum + self.compensation
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_vector_columns() {
        let mut v = StepVector::new(30_000);
        v.push(3, 1.5);
        v.push(0, 2.5);
        assert_eq!(v.len(), 2);
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![(3, 1.5), (0, 2.5)]);
    }

    #[test]
    fn test_welford_mean_variance() {
        let mut state = numeric::WelfordState::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            state.add(v);
        }

        assert!((state.mean - 5.0).abs() < 0.001);
        assert!((state.variance_population() - 4.0).abs() < 0.001);
        assert!((state.stddev_population() - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_kahan_sum_accuracy() {
        let mut kahan = numeric::KahanSum::new();
        let mut naive_sum = 0.0;

        kahan.add(1e17);
        naive_sum += 1e17;
        for _ in 0..1000 {
            kahan.add(1.0);
            naive_sum += 1.0;
        }
        kahan.add(-1e17);
        naive_sum -= 1e17;

        assert_eq!(kahan.sum(), 1000.0);
        assert!(naive_sum != 1000.0);
    }

    #[test]
    fn test_kahan_sum_infinity() {
        let mut kahan = numeric::KahanSum::new();
        kahan.add(f64::MAX);
        kahan.add(f64::MAX);
        assert_eq!(kahan.sum(), f64::INFINITY);
    }
}
