//! Scalar leaves - number literals and `time()`
//!
//! Both produce a single series with an empty label set and one sample per
//! evaluation step.

use super::{Explanation, StepVector, Steps, VectorOperator, VectorPool};
use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::query::options::QueryOptions;
use crate::types::Labels;
use std::sync::Arc;

fn single_series() -> Arc<[Labels]> {
    vec![Labels::new()].into()
}

/// Constant value at every step
pub struct NumberLiteralOperator {
    pool: Arc<VectorPool>,
    steps: Steps,
    value: f64,
}

impl NumberLiteralOperator {
    /// Create a literal emitting `value`
    pub fn new(pool: Arc<VectorPool>, opts: QueryOptions, value: f64) -> Self {
        Self {
            pool,
            steps: Steps::new(opts),
            value,
        }
    }
}

impl VectorOperator for NumberLiteralOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        let value = self.value;
        self.steps.next_batch(&self.pool, ctx, |vector| vector.push(0, value))
    }

    fn series(&mut self, _: &ExecutionContext) -> Result<Arc<[Labels]>> {
        Ok(single_series())
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::leaf(format!("[numberLiteral] {}", self.value))
    }
}

/// Evaluation timestamp in seconds at every step
pub struct TimeOperator {
    pool: Arc<VectorPool>,
    steps: Steps,
}

impl TimeOperator {
    /// Create a `time()` operator
    pub fn new(pool: Arc<VectorPool>, opts: QueryOptions) -> Self {
        Self {
            pool,
            steps: Steps::new(opts),
        }
    }
}

impl VectorOperator for TimeOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.steps.next_batch(&self.pool, ctx, |vector| {
            let seconds = vector.t as f64 / 1000.0;
            vector.push(0, seconds)
        })
    }

    fn series(&mut self, _: &ExecutionContext) -> Result<Arc<[Labels]>> {
        Ok(single_series())
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::leaf("[noArgFunction] time()")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_every_step() {
        let ctx = ExecutionContext::new();
        let opts = QueryOptions::range(0, 50_000, 10_000).unwrap().with_steps_batch(4);
        let mut op = NumberLiteralOperator::new(Arc::new(VectorPool::new(4)), opts, 0.9);
        assert_eq!(op.series(&ctx).unwrap().len(), 1);

        let first = op.next(&ctx).unwrap().unwrap();
        let second = op.next(&ctx).unwrap().unwrap();
        assert_eq!((first.len(), second.len()), (4, 2));
        assert!(first.iter().chain(&second).all(|v| v.samples == vec![0.9]));
        assert!(op.next(&ctx).unwrap().is_none());
        assert_eq!(op.explain().operator, "[numberLiteral] 0.9");
    }

    #[test]
    fn test_time_in_seconds() {
        let ctx = ExecutionContext::new();
        let opts = QueryOptions::range(0, 60_000, 30_000).unwrap();
        let mut op = TimeOperator::new(Arc::new(VectorPool::new(10)), opts);
        let batch = op.next(&ctx).unwrap().unwrap();
        let values: Vec<f64> = batch.iter().map(|v| v.samples[0]).collect();
        assert_eq!(values, vec![0.0, 30.0, 60.0]);
        assert_eq!(op.explain().operator, "[noArgFunction] time()");
    }

    #[test]
    fn test_cancelled_mid_batch() {
        let ctx = ExecutionContext::new();
        let opts = QueryOptions::range(0, 50_000, 10_000).unwrap().with_steps_batch(2);
        let mut op = NumberLiteralOperator::new(Arc::new(VectorPool::new(2)), opts, 1.0);
        assert_eq!(op.next(&ctx).unwrap().unwrap().len(), 2);

        ctx.cancel();
        let err = op.next(&ctx).unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_extreme_instant_timestamp() {
        let ctx = ExecutionContext::new();
        let mut op = TimeOperator::new(Arc::new(VectorPool::new(1)), QueryOptions::instant(i64::MAX));
        let batch = op.next(&ctx).unwrap().unwrap();
        assert_eq!(batch[0].t, i64::MAX);
        assert!(op.next(&ctx).unwrap().is_none());
    }
}
