//! Vector selector - samples raw series at every evaluation step
//!
//! At step `t` a series contributes its latest sample in `(t - lookback, t]`.
//! Series are split across shards by position: shard `i` of `n` owns every
//! series whose index modulo `n` is `i`. Each shard numbers its own series
//! from zero; the coalesce operator above stitches the id spaces together.

use super::{Explanation, StepVector, Steps, VectorOperator, VectorPool};
use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::query::options::QueryOptions;
use crate::query::plan::VectorSelector;
use crate::storage::Storage;
use crate::types::{Labels, Point};
use std::sync::Arc;

/// Per-series read position
struct Cursor {
    points: Vec<Point>,
    /// Number of points with `t <= ` the last evaluated step
    pos: usize,
}

impl Cursor {
    fn sample_at(&mut self, t: i64, lookback: i64) -> Option<f64> {
        while self.pos < self.points.len() && self.points[self.pos].t <= t {
            self.pos += 1;
        }
        let last = self.points[..self.pos].last()?;
        (last.t > t.saturating_sub(lookback)).then_some(last.v)
    }
}

/// Leaf operator reading one shard of a selector's series
pub struct VectorSelectorOperator {
    storage: Arc<dyn Storage>,
    selector: VectorSelector,
    pool: Arc<VectorPool>,
    opts: QueryOptions,
    shard: usize,
    num_shards: usize,

    series: Option<Arc<[Labels]>>,
    cursors: Vec<Cursor>,
    steps: Steps,
}

impl VectorSelectorOperator {
    /// Create shard `shard` of `num_shards` for `selector`
    pub fn new(
        storage: Arc<dyn Storage>,
        selector: VectorSelector,
        pool: Arc<VectorPool>,
        opts: QueryOptions,
        shard: usize,
        num_shards: usize,
    ) -> Self {
        Self {
            storage,
            selector,
            pool,
            opts,
            shard,
            num_shards: num_shards.max(1),
            series: None,
            cursors: Vec::new(),
            steps: Steps::new(opts),
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        ctx.check()?;

        let min_t = self.opts.lookback_start();
        let selected = self
            .storage
            .select(&self.selector.matchers, min_t, self.opts.end)?;

        let mut labels = Vec::new();
        for (i, s) in selected.into_iter().enumerate() {
            if i % self.num_shards != self.shard {
                continue;
            }
            labels.push(s.labels);
            self.cursors.push(Cursor { points: s.points, pos: 0 });
        }
        tracing::debug!(
            selector = %self.selector,
            shard = self.shard,
            series = labels.len(),
            "selector loaded series"
        );

        self.pool.set_step_size(labels.len());
        let series: Arc<[Labels]> = labels.into();
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }
}

impl VectorOperator for VectorSelectorOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        self.load(ctx)?;

        let lookback = self.opts.lookback_delta;
        let cursors = &mut self.cursors;
        self.steps.next_batch(&self.pool, ctx, |vector| {
            let t = vector.t;
            for (id, cursor) in cursors.iter_mut().enumerate() {
                if let Some(v) = cursor.sample_at(t, lookback) {
                    vector.push(id as u64, v);
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
        let matchers: Vec<String> = self.selector.matchers.iter().map(|m| m.to_string()).collect();
        Explanation::leaf(format!(
            "[vectorSelector] {{[{}]}} {} mod {}",
            matchers.join(" "),
            self.shard,
            self.num_shards
        ))
    }
}
