//! Aggregation Operator - per-step reductions across series
//!
//! Input series are mapped to output groups once, when `series` is first
//! resolved: `by (...)` keeps only the listed labels, `without (...)` drops
//! them together with the metric name. At every step, the samples of each
//! group are folded into an [`AggregationState`] and every group that saw
//! at least one sample emits one value.
//!
//! Uses numerically stable algorithms:
//! - Kahan summation for sum and avg
//! - Welford's algorithm for stddev and stdvar

use super::numeric::{KahanSum, WelfordState};
use super::{recycle, BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::query::error::{QueryError, Result};
use crate::query::executor::ExecutionContext;
use crate::query::plan::AggregateOp;
use crate::types::{Labels, METRIC_NAME};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Aggregation State
// ============================================================================

/// Running state of one group at one step
#[derive(Debug, Clone)]
pub enum AggregationState {
    /// Sum using Kahan summation
    Sum(KahanSum),

    /// Sum and count for the mean
    Avg {
        /// Compensated sum
        sum: KahanSum,
        /// Values seen
        count: u64,
    },

    /// Count of values
    Count(u64),

    /// Minimum value seen (NaN loses to any number)
    Min(f64),

    /// Maximum value seen (NaN loses to any number)
    Max(f64),

    /// Group existence
    Group,

    /// Mean and variance using Welford's algorithm
    Stats {
        /// Welford accumulator
        state: WelfordState,
        /// Report the square root
        stddev: bool,
    },
}

impl AggregationState {
    /// Create state seeded with the group's first value
    pub fn new(op: AggregateOp, first: f64) -> Self {
        let mut state = match op {
            AggregateOp::Sum => AggregationState::Sum(KahanSum::new()),
            AggregateOp::Avg => AggregationState::Avg {
                sum: KahanSum::new(),
                count: 0,
            },
            AggregateOp::Count => AggregationState::Count(0),
            AggregateOp::Min => AggregationState::Min(first),
            AggregateOp::Max => AggregationState::Max(first),
            AggregateOp::Group => AggregationState::Group,
            AggregateOp::Stddev => AggregationState::Stats {
                state: WelfordState::new(),
                stddev: true,
            },
            AggregateOp::Stdvar => AggregationState::Stats {
                state: WelfordState::new(),
                stddev: false,
            },
        };
        state.update(first);
        state
    }

    /// Fold in one value
    #[inline]
    pub fn update(&mut self, value: f64) {
        match self {
            AggregationState::Sum(sum) => sum.add(value),
            AggregationState::Avg { sum, count } => {
                sum.add(value);
                *count += 1;
            },
            AggregationState::Count(count) => *count += 1,
            AggregationState::Min(min) => {
                if *min > value || min.is_nan() {
                    *min = value;
                }
            },
            AggregationState::Max(max) => {
                if *max < value || max.is_nan() {
                    *max = value;
                }
            },
            AggregationState::Group => {},
            AggregationState::Stats { state, .. } => state.add(value),
        }
    }

    /// Final value
    pub fn finalize(&self) -> f64 {
        match self {
            AggregationState::Sum(sum) => sum.sum(),
            AggregationState::Avg { sum, count } => sum.sum() / *count as f64,
            AggregationState::Count(count) => *count as f64,
            AggregationState::Min(v) | AggregationState::Max(v) => *v,
            AggregationState::Group => 1.0,
            AggregationState::Stats { state, stddev: true } => state.stddev_population(),
            AggregationState::Stats { state, stddev: false } => state.variance_population(),
        }
    }
}

// ============================================================================
// Aggregate Operator
// ============================================================================

/// Groups input series and reduces each group per step
pub struct AggregateOperator {
    child: BoxedOperator,
    pool: Arc<VectorPool>,
    op: AggregateOp,
    grouping: Vec<String>,
    without: bool,

    series: Option<Arc<[Labels]>>,
    /// Input series id → output group id
    table: Vec<u64>,
    states: Vec<Option<AggregationState>>,
}

impl AggregateOperator {
    /// Create an aggregation over `child`
    pub fn new(
        child: BoxedOperator,
        pool: Arc<VectorPool>,
        op: AggregateOp,
        grouping: Vec<String>,
        without: bool,
    ) -> Self {
        Self {
            child,
            pool,
            op,
            grouping,
            without,
            series: None,
            table: Vec::new(),
            states: Vec::new(),
        }
    }

    fn group_labels(&self, labels: &Labels) -> Labels {
        let names: Vec<&str> = self.grouping.iter().map(String::as_str).collect();
        if self.without {
            let mut drop = names;
            drop.push(METRIC_NAME);
            labels.without(&drop)
        } else {
            labels.only(&names)
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }

        let input = self.child.series(ctx)?;
        let mut index: HashMap<Labels, u64> = HashMap::new();
        let mut groups = Vec::new();
        let mut table = Vec::with_capacity(input.len());
        for labels in input.iter() {
            let key = self.group_labels(labels);
            let id = *index.entry(key.clone()).or_insert_with(|| {
                groups.push(key);
                groups.len() as u64 - 1
            });
            table.push(id);
        }

        self.table = table;
        self.states = vec![None; groups.len()];
        self.pool.set_step_size(groups.len());
        let series: Arc<[Labels]> = groups.into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }

    fn aggregate_step(&mut self, input: &StepVector) -> Result<StepVector> {
        for (id, v) in input.iter() {
            let group = *self.table.get(id as usize).ok_or_else(|| {
                QueryError::internal(format!("aggregate input references unknown series id {}", id))
            })?;
            match &mut self.states[group as usize] {
                Some(state) => state.update(v),
                slot @ None => *slot = Some(AggregationState::new(self.op, v)),
            }
        }

        let mut out = self.pool.get_step_vector(input.t);
        for (group, slot) in self.states.iter_mut().enumerate() {
            if let Some(state) = slot.take() {
                out.push(group as u64, state.finalize());
            }
        }
        Ok(out)
    }
}

impl VectorOperator for AggregateOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;

        let Some(input) = self.child.next(ctx)? else {
            return Ok(None);
        };

        let mut out = self.pool.get_vectors();
        for vector in &input {
            ctx.check()?;
            out.push(self.aggregate_step(vector)?);
        }
        recycle(&self.pool, input);

        Ok(Some(out))
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        let modifier = if self.without { "without" } else { "by" };
        Explanation::with_children(
            format!(
                "[aggregate] {} {} ([{}])",
                self.op,
                modifier,
                self.grouping.join(" ")
            ),
            vec![self.child.explain()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::VectorSelectorOperator;
    use crate::query::options::QueryOptions;
    use crate::query::plan::VectorSelector;
    use crate::storage::{MemoryStorage, Storage};

    fn aggregate(op: AggregateOp, grouping: &[&str], without: bool) -> AggregateOperator {
        let storage = MemoryStorage::new();
        let rows = [("web", "a", 1.0), ("web", "b", 3.0), ("db", "a", 10.0)];
        for (job, instance, v) in rows {
            let lset = Labels::from_pairs(&[("__name__", "up"), ("job", job), ("instance", instance)]);
            storage.add_series(&lset, &[(0, v)]).unwrap();
        }
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let pool = Arc::new(VectorPool::new(10));
        let child = Box::new(VectorSelectorOperator::new(
            storage,
            VectorSelector::new("up"),
            Arc::clone(&pool),
            QueryOptions::instant(0),
            0,
            1,
        ));
        AggregateOperator::new(
            child,
            pool,
            op,
            grouping.iter().map(|s| s.to_string()).collect(),
            without,
        )
    }

    fn run(mut op: AggregateOperator) -> Vec<(Labels, f64)> {
        let ctx = ExecutionContext::new();
        let series = op.series(&ctx).unwrap();
        let batch = op.next(&ctx).unwrap().unwrap();
        let mut out: Vec<(Labels, f64)> = batch[0]
            .iter()
            .map(|(id, v)| (series[id as usize].clone(), v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn test_sum_by_job() {
        let out = run(aggregate(AggregateOp::Sum, &["job"], false));
        assert_eq!(
            out,
            vec![
                (Labels::from_pairs(&[("job", "db")]), 10.0),
                (Labels::from_pairs(&[("job", "web")]), 4.0),
            ]
        );
    }

    #[test]
    fn test_without_drops_metric_name() {
        let out = run(aggregate(AggregateOp::Max, &["job"], true));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], (Labels::from_pairs(&[("instance", "a")]), 10.0));
    }

    #[test]
    fn test_ungrouped_ops() {
        assert_eq!(run(aggregate(AggregateOp::Count, &[], false))[0].1, 3.0);
        assert_eq!(run(aggregate(AggregateOp::Min, &[], false))[0].1, 1.0);
        assert_eq!(run(aggregate(AggregateOp::Group, &[], false))[0].1, 1.0);
        let avg = run(aggregate(AggregateOp::Avg, &[], false))[0].1;
        assert!((avg - 14.0 / 3.0).abs() < 1e-12);
        let var = run(aggregate(AggregateOp::Stdvar, &["job"], false));
        assert_eq!(var[1].1, 1.0);
    }

    #[test]
    fn test_min_skips_nan() {
        let mut state = AggregationState::new(AggregateOp::Min, f64::NAN);
        state.update(2.0);
        state.update(5.0);
        assert_eq!(state.finalize(), 2.0);
    }

    #[test]
    fn test_explain() {
        let e = aggregate(AggregateOp::Sum, &["job"], false).explain();
        assert_eq!(e.operator, "[aggregate] sum by ([job])");
        assert_eq!(e.children.len(), 1);
    }
}
