//! Raw series storage consumed by vector selectors
//!
//! The engine reads raw samples through the [`Storage`] trait. A selector
//! asks for every series matching its label matchers with samples inside a
//! time window; the storage returns them with points in ascending time
//! order.
//!
//! # Example
//!
//! ```rust
//! use stepwise::storage::{MemoryStorage, Storage};
//! use stepwise::types::{Labels, Matcher};
//!
//! let storage = MemoryStorage::new();
//! let lset = Labels::from_pairs(&[("__name__", "up"), ("job", "web")]);
//! storage.append(&lset, 1000, 1.0).unwrap();
//!
//! let series = storage.select(&[Matcher::equal("__name__", "up")], 0, 2000).unwrap();
//! assert_eq!(series.len(), 1);
//! ```

/// In-memory storage implementation
pub mod memory;

pub use memory::MemoryStorage;

use crate::query::error::Result;
use crate::types::{Labels, Matcher, Point};

/// A series with its raw samples
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    /// Series labels
    pub labels: Labels,

    /// Samples in ascending timestamp order
    pub points: Vec<Point>,
}

/// Summary of stored data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of series
    pub series_count: usize,
    /// Number of samples across all series
    pub point_count: usize,
    /// Earliest sample timestamp, if any
    pub min_t: Option<i64>,
    /// Latest sample timestamp, if any
    pub max_t: Option<i64>,
}

/// Source of raw series for the query engine
pub trait Storage: Send + Sync {
    /// Series matching all `matchers` with samples in `[min_t, max_t]`
    ///
    /// Only points inside the window are returned and series without any
    /// are omitted. Output is ordered by labels.
    fn select(&self, matchers: &[Matcher], min_t: i64, max_t: i64) -> Result<Vec<StoredSeries>>;

    /// Summary of stored data
    fn stats(&self) -> StorageStats;
}
