//! Per-query buffer pool
//!
//! Operators check out step-vector batches and sample columns, fill them,
//! and the consumer hands them back once read. Checkout and return move
//! ownership, so a returned buffer cannot be touched again by the returner.
//! Reused buffers come back cleared; only their capacity survives.
//!
//! One pool serves the whole operator tree of a single query and is shared
//! as `Arc<VectorPool>`. It is never shared between queries.

use super::StepVector;
use crate::types::SeriesId;
use parking_lot::Mutex;

/// Default cap on retained buffers of each kind
pub const DEFAULT_MAX_RETAINED: usize = 1024;

/// Allocation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Checkouts served by a fresh allocation
    pub allocated: u64,
    /// Checkouts served from a returned buffer
    pub reused: u64,
    /// Buffers returned to the pool
    pub returned: u64,
    /// Returned buffers dropped because the pool was full
    pub discarded: u64,
}

impl PoolStats {
    /// Fraction of checkouts served from recycled buffers (0.0 to 1.0)
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.allocated + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct PoolInner {
    vectors: Vec<Vec<StepVector>>,
    ids: Vec<Vec<SeriesId>>,
    samples: Vec<Vec<f64>>,
    stats: PoolStats,
}

/// Recycles step-vector batches and sample columns
pub struct VectorPool {
    inner: Mutex<PoolInner>,
    steps_batch: usize,
    step_size: Mutex<usize>,
    max_retained: usize,
}

impl VectorPool {
    /// Create a pool for batches of `steps_batch` steps
    pub fn new(steps_batch: usize) -> Self {
        Self::with_max_retained(steps_batch, DEFAULT_MAX_RETAINED)
    }

    /// Create a pool retaining at most `max_retained` buffers of each kind
    pub fn with_max_retained(steps_batch: usize, max_retained: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            steps_batch: steps_batch.max(1),
            step_size: Mutex::new(0),
            max_retained,
        }
    }

    /// Set the expected number of samples per step
    ///
    /// Fresh sample columns are allocated with this capacity. Operators call
    /// this once they know their series count.
    pub fn set_step_size(&self, n: usize) {
        let mut size = self.step_size.lock();
        if n > *size {
            *size = n;
        }
    }

    /// Expected number of samples per step
    pub fn step_size(&self) -> usize {
        *self.step_size.lock()
    }

    /// Check out an empty batch container
    pub fn get_vectors(&self) -> Vec<StepVector> {
        let mut inner = self.inner.lock();
        match inner.vectors.pop() {
            Some(v) => {
                inner.stats.reused += 1;
                v
            },
            None => {
                inner.stats.allocated += 1;
                Vec::with_capacity(self.steps_batch)
            },
        }
    }

    /// Return a batch container
    ///
    /// Any step vectors still inside are dropped; return them first with
    /// [`put_step_vector`](Self::put_step_vector) to recycle their columns.
    pub fn put_vectors(&self, mut vectors: Vec<StepVector>) {
        vectors.clear();
        let mut inner = self.inner.lock();
        inner.stats.returned += 1;
        if inner.vectors.len() < self.max_retained {
            inner.vectors.push(vectors);
        } else {
            inner.stats.discarded += 1;
        }
    }

    /// Check out an empty step vector for timestamp `t`
    pub fn get_step_vector(&self, t: i64) -> StepVector {
        let step_size = self.step_size();
        let mut inner = self.inner.lock();
        let ids = inner.ids.pop();
        let samples = inner.samples.pop();
        match (ids, samples) {
            (Some(sample_ids), Some(samples)) => {
                inner.stats.reused += 1;
                StepVector { t, sample_ids, samples }
            },
            (ids, samples) => {
                inner.stats.allocated += 1;
                StepVector {
                    t,
                    sample_ids: ids.unwrap_or_else(|| Vec::with_capacity(step_size)),
                    samples: samples.unwrap_or_else(|| Vec::with_capacity(step_size)),
                }
            },
        }
    }

    /// Return the columns of a consumed step vector
    pub fn put_step_vector(&self, vector: StepVector) {
        let StepVector {
            mut sample_ids,
            mut samples,
            ..
        } = vector;
        sample_ids.clear();
        samples.clear();

        let mut inner = self.inner.lock();
        inner.stats.returned += 1;
        if inner.ids.len() < self.max_retained && inner.samples.len() < self.max_retained {
            inner.ids.push(sample_ids);
            inner.samples.push(samples);
        } else {
            inner.stats.discarded += 1;
        }
    }

    /// Allocation statistics so far
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }
}

impl std::fmt::Debug for VectorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorPool")
            .field("steps_batch", &self.steps_batch)
            .field("step_size", &self.step_size())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returned_step_vector_is_reset() {
        let pool = VectorPool::new(10);
        let mut v = pool.get_step_vector(1000);
        v.push(1, 42.0);
        v.push(2, 43.0);
        pool.put_step_vector(v);

        let reused = pool.get_step_vector(2000);
        assert_eq!(reused.t, 2000);
        assert!(reused.is_empty());
        assert!(reused.sample_ids.is_empty());
        assert!(reused.samples.capacity() >= 2);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_returned_batch_is_reset() {
        let pool = VectorPool::new(4);
        let mut batch = pool.get_vectors();
        assert!(batch.capacity() >= 4);
        batch.push(StepVector::new(0));
        pool.put_vectors(batch);

        let batch = pool.get_vectors();
        assert!(batch.is_empty());
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_step_size_sets_capacity() {
        let pool = VectorPool::new(1);
        pool.set_step_size(64);
        pool.set_step_size(8);
        assert_eq!(pool.step_size(), 64);
        assert!(pool.get_step_vector(0).samples.capacity() >= 64);
    }

    #[test]
    fn test_max_retained() {
        let pool = VectorPool::with_max_retained(1, 1);
        pool.put_step_vector(StepVector::new(0));
        pool.put_step_vector(StepVector::new(0));
        let stats = pool.stats();
        assert_eq!(stats.returned, 2);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_reuse_ratio() {
        let stats = PoolStats {
            allocated: 1,
            reused: 3,
            ..Default::default()
        };
        assert!((stats.reuse_ratio() - 0.75).abs() < 1e-9);
    }
}
