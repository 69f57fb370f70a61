use super::{Storage, StorageStats, StoredSeries};
use crate::query::error::{QueryError, Result};
use crate::types::{Labels, Matcher, Point};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Series kept in memory, ordered by labels
#[derive(Debug, Default)]
pub struct MemoryStorage {
    series: RwLock<BTreeMap<Labels, Vec<Point>>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample
    ///
    /// Timestamps must strictly increase per series.
    pub fn append(&self, labels: &Labels, t: i64, v: f64) -> Result<()> {
        let mut series = self.series.write();
        let points = series.entry(labels.clone()).or_default();
        if let Some(last) = points.last() {
            if t <= last.t {
                return Err(QueryError::storage(format!(
                    "out of order sample for {}: {} <= {}",
                    labels, t, last.t
                )));
            }
        }
        points.push(Point::new(t, v));
        Ok(())
    }

    /// Append a run of samples
    pub fn add_series(&self, labels: &Labels, samples: &[(i64, f64)]) -> Result<()> {
        for &(t, v) in samples {
            self.append(labels, t, v)?;
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn select(&self, matchers: &[Matcher], min_t: i64, max_t: i64) -> Result<Vec<StoredSeries>> {
        let series = self.series.read();
        let out = series
            .iter()
            .filter(|(labels, _)| matchers.iter().all(|m| m.matches_labels(labels)))
            .filter_map(|(labels, points)| {
                let lo = points.partition_point(|p| p.t < min_t);
                let hi = points.partition_point(|p| p.t <= max_t);
                (lo < hi).then(|| StoredSeries {
                    labels: labels.clone(),
                    points: points[lo..hi].to_vec(),
                })
            })
            .collect();
        Ok(out)
    }

    fn stats(&self) -> StorageStats {
        let series = self.series.read();
        let mut stats = StorageStats {
            series_count: series.len(),
            ..Default::default()
        };
        for points in series.values() {
            stats.point_count += points.len();
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                stats.min_t = Some(stats.min_t.map_or(first.t, |m| m.min(first.t)));
                stats.max_t = Some(stats.max_t.map_or(last.t, |m| m.max(last.t)));
            }
        }
        stats
    }
}
