//! Remote execution - serves a delegated sub-plan's answer as step vectors
//!
//! On first use the wrapped plan is sent to its backend over the
//! delegation window. Returned series become this operator's series in the
//! order the backend produced them; their points are replayed step by step.

use super::{Explanation, StepVector, Steps, VectorOperator, VectorPool};
use crate::query::error::{QueryError, Result};
use crate::query::executor::ExecutionContext;
use crate::query::options::QueryOptions;
use crate::query::plan::Node;
use crate::query::remote::RemoteEngine;
use crate::types::{Labels, Point};
use std::sync::Arc;

/// Leaf operator backed by a remote engine
pub struct RemoteExecutionOperator {
    engine: Arc<dyn RemoteEngine>,
    query: Node,
    pool: Arc<VectorPool>,
    opts: QueryOptions,

    series: Option<Arc<[Labels]>>,
    points: Vec<Vec<Point>>,
    positions: Vec<usize>,
    steps: Steps,
}

impl RemoteExecutionOperator {
    /// Create the operator for `query` over `[start, end]`
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        query: Node,
        pool: Arc<VectorPool>,
        opts: QueryOptions,
        start: i64,
        end: i64,
    ) -> Self {
        let opts = QueryOptions { start, end, ..opts };
        Self {
            engine,
            query,
            pool,
            opts,
            series: None,
            points: Vec::new(),
            positions: Vec::new(),
            steps: Steps::new(opts),
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        ctx.check()?;

        let result = self
            .engine
            .execute(ctx, &self.query, &self.opts)
            .map_err(|e| {
                if e.is_cancellation() {
                    return e;
                }
                QueryError::remote(format!("remote engine {} failed", self.engine.name())).with_source(e)
            })?;
        tracing::debug!(
            backend = %self.engine.name(),
            query = %self.query,
            series = result.len(),
            "remote query answered"
        );

        let mut labels = Vec::with_capacity(result.len());
        for s in result {
            labels.push(s.metric);
            self.points.push(s.points);
        }
        self.positions = vec![0; labels.len()];
        self.pool.set_step_size(labels.len());
        let series: Arc<[Labels]> = labels.into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }
}

impl VectorOperator for RemoteExecutionOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;

        let points = &self.points;
        let positions = &mut self.positions;
        self.steps.next_batch(&self.pool, ctx, |vector| {
            let t = vector.t;
            for (id, points) in points.iter().enumerate() {
                let pos = &mut positions[id];
                while *pos < points.len() && points[*pos].t < t {
                    *pos += 1;
                }
                if let Some(p) = points.get(*pos).filter(|p| p.t == t) {
                    vector.push(id as u64, p.v);
                }
            }
        })
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::leaf(format!(
            "[remoteExec] {} ({}, {})",
            self.query, self.opts.start, self.opts.end
        ))
    }
}
