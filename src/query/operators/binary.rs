//! Binary operators - arithmetic and comparisons between operands
//!
//! Two shapes are supported:
//! - [`ScalarBinaryOperator`]: a vector against a single-series scalar
//!   operand (a literal or `time()`), evaluated per step
//! - [`VectorBinaryOperator`]: two vectors matched one-to-one on their
//!   label sets with the metric name removed
//!
//! Arithmetic results and `bool` comparisons drop the metric name.
//! Comparisons without `bool` act as filters and keep the vector's value.

use super::{recycle, BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::query::error::{QueryError, Result};
use crate::query::executor::ExecutionContext;
use crate::query::plan::BinaryOp;
use crate::types::Labels;
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluate one element pair, returning `None` when a filter drops it
///
/// `vector_value` is the value kept by a filtering comparison.
#[inline]
fn eval(op: BinaryOp, return_bool: bool, lhs: f64, rhs: f64, vector_value: f64) -> Option<f64> {
    let value = op.apply(lhs, rhs);
    if !op.is_comparison() || return_bool {
        return Some(value);
    }
    (value == 1.0).then_some(vector_value)
}

fn output_labels(op: BinaryOp, return_bool: bool, labels: &Labels) -> Labels {
    if !op.is_comparison() || return_bool {
        labels.drop_metric_name()
    } else {
        labels.clone()
    }
}

/// Pull one batch from both sides, or `None` once either side is done
fn next_pair(
    pool: &Arc<VectorPool>,
    lhs: &mut BoxedOperator,
    rhs: &mut BoxedOperator,
    ctx: &ExecutionContext,
) -> Result<Option<(Vec<StepVector>, Vec<StepVector>)>> {
    let left = lhs.next(ctx)?;
    let right = match rhs.next(ctx) {
        Ok(right) => right,
        Err(e) => {
            if let Some(left) = left {
                recycle(pool, left);
            }
            return Err(e);
        },
    };
    match (left, right) {
        (Some(l), Some(r)) => Ok(Some((l, r))),
        (l, r) => {
            l.into_iter().chain(r).for_each(|b| recycle(pool, b));
            Ok(None)
        },
    }
}

// ============================================================================
// Vector / scalar
// ============================================================================

/// Applies an operator between every sample of a vector and a scalar
pub struct ScalarBinaryOperator {
    vector: BoxedOperator,
    scalar: BoxedOperator,
    pool: Arc<VectorPool>,
    op: BinaryOp,
    return_bool: bool,
    /// `scalar op vector` rather than `vector op scalar`
    scalar_on_left: bool,
    series: Option<Arc<[Labels]>>,
}

impl ScalarBinaryOperator {
    /// Create the operator; `scalar` must yield one series
    pub fn new(
        vector: BoxedOperator,
        scalar: BoxedOperator,
        pool: Arc<VectorPool>,
        op: BinaryOp,
        return_bool: bool,
        scalar_on_left: bool,
    ) -> Self {
        Self {
            vector,
            scalar,
            pool,
            op,
            return_bool,
            scalar_on_left,
            series: None,
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        let scalar = self.scalar.series(ctx)?;
        if scalar.len() != 1 {
            return Err(QueryError::execution(format!(
                "scalar operand must have exactly one series, got {}",
                scalar.len()
            )));
        }
        let input = self.vector.series(ctx)?;
        let series: Arc<[Labels]> = input
            .iter()
            .map(|l| output_labels(self.op, self.return_bool, l))
            .collect::<Vec<_>>()
            .into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }
}

impl VectorOperator for ScalarBinaryOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;
        let Some((vectors, scalars)) = next_pair(&self.pool, &mut self.vector, &mut self.scalar, ctx)? else {
            return Ok(None);
        };

        let mut out = self.pool.get_vectors();
        for (vector, scalar) in vectors.iter().zip(&scalars) {
            ctx.check()?;
            let mut step = self.pool.get_step_vector(vector.t);
            if let Some(&s) = scalar.samples.first() {
                for (id, v) in vector.iter() {
                    let (lhs, rhs) = if self.scalar_on_left { (s, v) } else { (v, s) };
                    if let Some(value) = eval(self.op, self.return_bool, lhs, rhs, v) {
                        step.push(id, value);
                    }
                }
            }
            out.push(step);
        }
        recycle(&self.pool, vectors);
        recycle(&self.pool, scalars);

        Ok(Some(out))
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        let children = if self.scalar_on_left {
            vec![self.scalar.explain(), self.vector.explain()]
        } else {
            vec![self.vector.explain(), self.scalar.explain()]
        };
        let modifier = if self.return_bool { " bool" } else { "" };
        Explanation::with_children(format!("[scalarBinary] {}{}", self.op, modifier), children)
    }
}

// ============================================================================
// Vector / vector
// ============================================================================

/// Matches two vectors one-to-one and applies an operator per pair
pub struct VectorBinaryOperator {
    lhs: BoxedOperator,
    rhs: BoxedOperator,
    pool: Arc<VectorPool>,
    op: BinaryOp,
    return_bool: bool,

    series: Option<Arc<[Labels]>>,
    /// lhs id → (rhs id, output id)
    matches: Vec<Option<(u64, u64)>>,
    rhs_values: Vec<Option<f64>>,
}

impl VectorBinaryOperator {
    /// Create a one-to-one binary operation
    pub fn new(
        lhs: BoxedOperator,
        rhs: BoxedOperator,
        pool: Arc<VectorPool>,
        op: BinaryOp,
        return_bool: bool,
    ) -> Self {
        Self {
            lhs,
            rhs,
            pool,
            op,
            return_bool,
            series: None,
            matches: Vec::new(),
            rhs_values: Vec::new(),
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        let left = self.lhs.series(ctx)?;
        let right = self.rhs.series(ctx)?;

        let mut by_signature: HashMap<Labels, u64> = HashMap::with_capacity(right.len());
        for (id, labels) in right.iter().enumerate() {
            let signature = labels.drop_metric_name();
            if by_signature.insert(signature, id as u64).is_some() {
                return Err(QueryError::execution(format!(
                    "found duplicate series for the match group {} on the right hand-side of the operation",
                    labels.drop_metric_name()
                )));
            }
        }

        let mut seen: HashMap<u64, &Labels> = HashMap::new();
        let mut matches = Vec::with_capacity(left.len());
        let mut labels = Vec::new();
        for lset in left.iter() {
            let Some(&rhs_id) = by_signature.get(&lset.drop_metric_name()) else {
                matches.push(None);
                continue;
            };
            if let Some(previous) = seen.insert(rhs_id, lset) {
                return Err(QueryError::execution(format!(
                    "found duplicate series for the match group on the left hand-side of the operation: {} and {}",
                    previous, lset
                )));
            }
            matches.push(Some((rhs_id, labels.len() as u64)));
            labels.push(output_labels(self.op, self.return_bool, lset));
        }

        tracing::trace!(lhs = left.len(), rhs = right.len(), matched = labels.len(), "binary matching");
        self.matches = matches;
        self.rhs_values = vec![None; right.len()];
        self.pool.set_step_size(labels.len());
        let series: Arc<[Labels]> = labels.into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }
}

impl VectorOperator for VectorBinaryOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;
        let Some((left, right)) = next_pair(&self.pool, &mut self.lhs, &mut self.rhs, ctx)? else {
            return Ok(None);
        };

        let mut out = self.pool.get_vectors();
        for (l, r) in left.iter().zip(&right) {
            ctx.check()?;
            for (id, v) in r.iter() {
                self.rhs_values[id as usize] = Some(v);
            }

            let mut step = self.pool.get_step_vector(l.t);
            for (id, lv) in l.iter() {
                let Some((rhs_id, out_id)) = self.matches[id as usize] else {
                    continue;
                };
                let Some(rv) = self.rhs_values[rhs_id as usize] else {
                    continue;
                };
                if let Some(value) = eval(self.op, self.return_bool, lv, rv, lv) {
                    step.push(out_id, value);
                }
            }
            out.push(step);

            for (id, _) in r.iter() {
                self.rhs_values[id as usize] = None;
            }
        }
        recycle(&self.pool, left);
        recycle(&self.pool, right);

        Ok(Some(out))
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        let modifier = if self.return_bool { " bool" } else { "" };
        Explanation::with_children(
            format!("[vectorBinary] {}{} - one-to-one", self.op, modifier),
            vec![self.lhs.explain(), self.rhs.explain()],
        )
    }
}
