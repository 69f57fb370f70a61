//! Histogram quantile - `histogram_quantile(q, buckets)` per step
//!
//! Input series are classic histogram buckets: one series per upper bound,
//! carrying the bound in the `le` label. Series sharing every other label
//! (metric name excluded) form one histogram. At each step the buckets of
//! every histogram are collected and handed to [`bucket_quantile`].
//!
//! Repairs of non-monotonic input are not errors: they are counted and
//! surfaced as query warnings.

use super::{recycle, BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::metrics;
use crate::query::error::{QueryError, Result};
use crate::query::executor::ExecutionContext;
use crate::query::histogram::{bucket_quantile, parse_bucket_bound, Bucket};
use crate::types::{Labels, BUCKET_LABEL, METRIC_NAME};
use std::collections::HashMap;
use std::sync::Arc;

/// Where an input series lands
#[derive(Debug, Clone, Copy)]
struct BucketSlot {
    histogram: usize,
    upper_bound: f64,
}

/// Estimates quantiles from bucketed series
pub struct HistogramQuantileOperator {
    quantile: BoxedOperator,
    vector: BoxedOperator,
    pool: Arc<VectorPool>,

    series: Option<Arc<[Labels]>>,
    /// Input id → bucket slot, `None` for series without a usable `le`
    slots: Vec<Option<BucketSlot>>,
    /// Metric name per output histogram, for warnings
    names: Vec<String>,
    buckets: Vec<Vec<Bucket>>,
}

impl HistogramQuantileOperator {
    /// Create the operator; `quantile` must yield one series
    pub fn new(quantile: BoxedOperator, vector: BoxedOperator, pool: Arc<VectorPool>) -> Self {
        Self {
            quantile,
            vector,
            pool,
            series: None,
            slots: Vec::new(),
            names: Vec::new(),
            buckets: Vec::new(),
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        let quantile = self.quantile.series(ctx)?;
        if quantile.len() != 1 {
            return Err(QueryError::execution(format!(
                "histogram_quantile expects a scalar quantile, got {} series",
                quantile.len()
            )));
        }

        let input = self.vector.series(ctx)?;
        let mut index: HashMap<Labels, usize> = HashMap::new();
        let mut groups = Vec::new();
        let mut names = Vec::new();
        let mut slots = Vec::with_capacity(input.len());
        for labels in input.iter() {
            let bound = labels.get(BUCKET_LABEL).and_then(parse_bucket_bound);
            let Some(upper_bound) = bound else {
                tracing::warn!(series = %labels, "ignoring series with missing or invalid bucket label");
                ctx.add_warning(format!(
                    "bucket label {:?} is missing or has a malformed value for metric name {:?}",
                    BUCKET_LABEL,
                    labels.get(METRIC_NAME).unwrap_or_default()
                ));
                slots.push(None);
                continue;
            };

            let key = labels.without(&[BUCKET_LABEL, METRIC_NAME]);
            let histogram = *index.entry(key.clone()).or_insert_with(|| {
                groups.push(key);
                names.push(labels.get(METRIC_NAME).unwrap_or_default().to_string());
                groups.len() - 1
            });
            slots.push(Some(BucketSlot { histogram, upper_bound }));
        }

        self.slots = slots;
        self.names = names;
        self.buckets = vec![Vec::new(); groups.len()];
        self.pool.set_step_size(groups.len());
        let series: Arc<[Labels]> = groups.into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }

    fn quantile_step(&mut self, ctx: &ExecutionContext, q: f64, input: &StepVector) -> StepVector {
        for (id, v) in input.iter() {
            if let Some(Some(slot)) = self.slots.get(id as usize) {
                self.buckets[slot.histogram].push(Bucket::new(slot.upper_bound, v));
            }
        }

        let mut out = self.pool.get_step_vector(input.t);
        for (histogram, buckets) in self.buckets.iter_mut().enumerate() {
            if buckets.is_empty() {
                continue;
            }
            let (value, repair) = bucket_quantile(q, buckets);
            if repair.forced_monotonic {
                metrics::record_bucket_repair("forced_monotonic");
                ctx.add_warning(format!(
                    "input to histogram_quantile needed to be fixed for monotonicity for metric name {:?}",
                    self.names[histogram]
                ));
            }
            if repair.fixed_precision {
                metrics::record_bucket_repair("fixed_precision");
            }
            out.push(histogram as u64, value);
            buckets.clear();
        }
        out
    }
}

impl VectorOperator for HistogramQuantileOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;

        let Some(quantiles) = self.quantile.next(ctx)? else {
            return Ok(None);
        };
        let vectors = match self.vector.next(ctx) {
            Ok(Some(vectors)) => vectors,
            other => {
                recycle(&self.pool, quantiles);
                return other;
            },
        };

        let mut out = self.pool.get_vectors();
        for (q, vector) in quantiles.iter().zip(&vectors) {
            ctx.check()?;
            let q = q.samples.first().copied().unwrap_or(f64::NAN);
            if !(0.0..=1.0).contains(&q) {
                ctx.add_warning(format!("quantile value should be between 0 and 1, got {}", q));
            }
            out.push(self.quantile_step(ctx, q, vector));
        }
        recycle(&self.pool, quantiles);
        recycle(&self.pool, vectors);

        Ok(Some(out))
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::with_children(
            "[histogramQuantile]",
            vec![self.quantile.explain(), self.vector.explain()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::{NumberLiteralOperator, VectorSelectorOperator};
    use crate::query::options::QueryOptions;
    use crate::query::plan::VectorSelector;
    use crate::storage::{MemoryStorage, Storage};

    fn operator(q: f64, buckets: &[(&str, &str, f64)]) -> HistogramQuantileOperator {
        let s = MemoryStorage::new();
        for (job, le, count) in buckets {
            let lset = Labels::from_pairs(&[("__name__", "latency_bucket"), ("job", job), ("le", le)]);
            s.add_series(&lset, &[(0, *count)]).unwrap();
        }
        let storage: Arc<dyn Storage> = Arc::new(s);
        let pool = Arc::new(VectorPool::new(10));
        let opts = QueryOptions::instant(0);
        let vector = Box::new(VectorSelectorOperator::new(
            storage,
            VectorSelector::new("latency_bucket"),
            Arc::clone(&pool),
            opts,
            0,
            1,
        ));
        let quantile = Box::new(NumberLiteralOperator::new(Arc::clone(&pool), opts, q));
        HistogramQuantileOperator::new(quantile, vector, pool)
    }

    fn run(op: &mut HistogramQuantileOperator, ctx: &ExecutionContext) -> Vec<(Labels, f64)> {
        let series = op.series(ctx).unwrap();
        let batch = op.next(ctx).unwrap().unwrap();
        let mut out: Vec<(Labels, f64)> = batch[0]
            .iter()
            .map(|(id, v)| (series[id as usize].clone(), v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn test_groups_by_labels_without_le() {
        let ctx = ExecutionContext::new();
        let mut op = operator(
            0.5,
            &[
                ("a", "1", 1.0),
                ("a", "2", 2.0),
                ("a", "+Inf", 3.0),
                ("b", "10", 0.0),
                ("b", "+Inf", 4.0),
            ],
        );
        let out = run(&mut op, &ctx);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], (Labels::from_pairs(&[("job", "a")]), 1.5));
        // rank falls into the +Inf bucket
        assert_eq!(out[1], (Labels::from_pairs(&[("job", "b")]), 10.0));
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_monotonicity_repair_warns() {
        let ctx = ExecutionContext::new();
        let mut op = operator(0.5, &[("a", "1", 5.0), ("a", "2", 3.0), ("a", "+Inf", 10.0)]);
        run(&mut op, &ctx);
        let warnings = ctx.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.iter().next().unwrap().contains("monotonicity"));
    }

    #[test]
    fn test_invalid_le_is_skipped() {
        let ctx = ExecutionContext::new();
        let mut op = operator(0.9, &[("a", "oops", 1.0), ("a", "1", 1.0), ("a", "+Inf", 1.0)]);
        let out = run(&mut op, &ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_out_of_range_quantile() {
        let ctx = ExecutionContext::new();
        let mut op = operator(2.0, &[("a", "1", 1.0), ("a", "+Inf", 2.0)]);
        let out = run(&mut op, &ctx);
        assert_eq!(out[0].1, f64::INFINITY);
        assert!(ctx.warnings().iter().any(|w| w.contains("between 0 and 1")));
    }

    #[test]
    fn test_explain() {
        let e = operator(0.9, &[]).explain();
        assert_eq!(e.operator, "[histogramQuantile]");
        assert_eq!(e.children[0].operator, "[numberLiteral] 0.9");
    }
}
