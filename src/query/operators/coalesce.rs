//! Coalesce - merges shards of one selector into a single id space
//!
//! Children are pulled in parallel on rayon's pool. Child `i`'s local ids
//! are shifted by the number of series of all children before it, so ids
//! stay stable no matter which child produced a sample.

use super::{recycle, BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::types::Labels;
use rayon::prelude::*;
use std::sync::Arc;

/// Concatenates the series of its children
pub struct CoalesceOperator {
    children: Vec<BoxedOperator>,
    pool: Arc<VectorPool>,
    series: Option<Arc<[Labels]>>,
    offsets: Vec<u64>,
    done: bool,
}

impl CoalesceOperator {
    /// Create a coalesce over `children`
    pub fn new(pool: Arc<VectorPool>, children: Vec<BoxedOperator>) -> Self {
        Self {
            children,
            pool,
            series: None,
            offsets: Vec::new(),
            done: false,
        }
    }

    fn load(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }

        let per_child: Vec<Result<Arc<[Labels]>>> = self
            .children
            .par_iter_mut()
            .map(|child| child.series(ctx))
            .collect();

        let mut labels = Vec::new();
        let mut offsets = Vec::with_capacity(per_child.len());
        for child_series in per_child {
            let child_series = child_series?;
            offsets.push(labels.len() as u64);
            labels.extend(child_series.iter().cloned());
        }

        self.pool.set_step_size(labels.len());
        let series: Arc<[Labels]> = labels.into();
        self.offsets = offsets;
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }
}

impl VectorOperator for CoalesceOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        if self.done {
            return Ok(None);
        }
        ctx.check()?;
        self.load(ctx)?;

        let batches: Vec<Result<Option<Vec<StepVector>>>> = self
            .children
            .par_iter_mut()
            .map(|child| child.next(ctx))
            .collect();

        let mut out: Option<Vec<StepVector>> = None;
        let mut first_err = None;
        for (i, batch) in batches.into_iter().enumerate() {
            let batch = match batch {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(e) => {
                    first_err.get_or_insert(e);
                    continue;
                },
            };
            if first_err.is_some() {
                recycle(&self.pool, batch);
                continue;
            }

            let offset = self.offsets[i];
            let merged = out.get_or_insert_with(|| self.pool.get_vectors());
            for (j, vector) in batch.iter().enumerate() {
                if merged.len() <= j {
                    merged.push(self.pool.get_step_vector(vector.t));
                }
                let dst = &mut merged[j];
                for (id, v) in vector.iter() {
                    dst.push(id + offset, v);
                }
            }
            recycle(&self.pool, batch);
        }

        if let Some(err) = first_err {
            if let Some(out) = out {
                recycle(&self.pool, out);
            }
            return Err(err);
        }
        if out.is_none() {
            self.done = true;
        }
        Ok(out)
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        self.load(ctx)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::with_children(
            "[coalesce]",
            self.children.iter().map(|c| c.explain()).collect(),
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

    fn coalesce(num_shards: usize) -> CoalesceOperator {
        let storage = MemoryStorage::new();
        for i in 0..5 {
            let lset = Labels::from_pairs(&[("__name__", "foo"), ("i", i.to_string().as_str())]);
            storage.add_series(&lset, &[(0, i as f64)]).unwrap();
        }
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let pool = Arc::new(VectorPool::new(10));
        let opts = QueryOptions::instant(0);
        let children = (0..num_shards)
            .map(|shard| {
                Box::new(VectorSelectorOperator::new(
                    Arc::clone(&storage),
                    VectorSelector::new("foo"),
                    Arc::clone(&pool),
                    opts,
                    shard,
                    num_shards,
                )) as BoxedOperator
            })
            .collect();
        CoalesceOperator::new(pool, children)
    }

    #[test]
    fn test_ids_follow_series_order() {
        let ctx = ExecutionContext::new();
        let mut op = coalesce(2);
        let series = op.series(&ctx).unwrap();
        assert_eq!(series.len(), 5);

        let batch = op.next(&ctx).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        for (id, v) in batch[0].iter() {
            let expected: f64 = series[id as usize]
                .get("i")
                .and_then(|s| s.parse().ok())
                .unwrap();
            assert_eq!(v, expected);
        }
        assert_eq!(batch[0].len(), 5);
        assert!(op.next(&ctx).unwrap().is_none());
        assert!(op.next(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_explain_lists_shards() {
        let e = coalesce(3).explain();
        assert_eq!(e.operator, "[coalesce]");
        assert_eq!(e.children.len(), 3);
        assert_eq!(e.children[2].operator, "[vectorSelector] {[__name__=\"foo\"]} 2 mod 3");
    }
}
