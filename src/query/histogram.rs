//! Histogram math: classic bucket quantiles and float histogram spread
//!
//! # Bucket quantile
//!
//! [`bucket_quantile`] estimates a quantile from cumulative `le` buckets,
//! interpolating linearly inside the bucket the rank falls into:
//!
//! ```text
//!   count
//!     3 ┤                 ●  +Inf
//!     2 ┤        ●  2
//!   1.5 ┤ ─ ─ ─ ╱ rank = 0.5 * 3
//!     1 ┤  ●  1
//!       └──┴─────┴────────┴──
//!          1   1.5  2      +Inf
//! ```
//!
//! Bucket counts are assumed cumulative and therefore non-decreasing. That
//! is enforced rather than trusted: differences below a relative tolerance
//! are treated as float noise and decreases are clamped away. Both repairs
//! are reported back so callers can surface a warning.

use crate::query::operators::numeric::KahanSum;

/// Relative difference between neighbouring bucket counts treated as noise
pub const SMALL_DELTA_TOLERANCE: f64 = 1e-12;

/// A cumulative classic histogram bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Inclusive upper bound (`le` label)
    pub upper_bound: f64,
    /// Observations less than or equal to the bound
    pub count: f64,
}

impl Bucket {
    /// Create a new bucket
    pub fn new(upper_bound: f64, count: f64) -> Self {
        Self { upper_bound, count }
    }
}

/// Corrections applied to bucket counts before ranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketRepair {
    /// A count lower than its predecessor was raised to it
    pub forced_monotonic: bool,
    /// A count within float tolerance of its predecessor was snapped to it
    pub fixed_precision: bool,
}

impl BucketRepair {
    /// Whether any correction was applied
    pub fn any(&self) -> bool {
        self.forced_monotonic || self.fixed_precision
    }
}

/// Parse an `le` label value
pub fn parse_bucket_bound(value: &str) -> Option<f64> {
    match value.trim() {
        "+Inf" | "Inf" | "inf" | "+inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// Estimate quantile `q` from cumulative buckets
///
/// The slice is reordered in place (sorted by bound, equal bounds merged to
/// the front); its contents are unspecified afterwards.
///
/// Degenerate inputs resolve to sentinels instead of errors:
/// - `q` NaN gives NaN, `q < 0` gives -Inf, `q > 1` gives +Inf
/// - no buckets, a top bound other than +Inf, fewer than two distinct
///   bounds, or zero observations give NaN
///
/// If the rank falls into the +Inf bucket the second highest bound is
/// returned. A first bucket with a non-positive bound is returned as-is;
/// otherwise the lowest bucket interpolates from zero.
pub fn bucket_quantile(q: f64, buckets: &mut [Bucket]) -> (f64, BucketRepair) {
    let none = BucketRepair::default();
    if q.is_nan() {
        return (f64::NAN, none);
    }
    if q < 0.0 {
        return (f64::NEG_INFINITY, none);
    }
    if q > 1.0 {
        return (f64::INFINITY, none);
    }
    if buckets.is_empty() {
        return (f64::NAN, none);
    }

    buckets.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
    if buckets[buckets.len() - 1].upper_bound != f64::INFINITY {
        return (f64::NAN, none);
    }

    let len = coalesce_buckets(buckets);
    let buckets = &mut buckets[..len];
    let repair = ensure_monotonic(buckets, SMALL_DELTA_TOLERANCE);

    if buckets.len() < 2 {
        return (f64::NAN, none);
    }
    let observations = buckets[buckets.len() - 1].count;
    if observations == 0.0 {
        return (f64::NAN, none);
    }

    let mut rank = q * observations;
    let last = buckets.len() - 1;
    let b = buckets[..last].partition_point(|bucket| bucket.count < rank);

    if b == last {
        return (buckets[last - 1].upper_bound, repair);
    }
    if b == 0 && buckets[0].upper_bound <= 0.0 {
        return (buckets[0].upper_bound, repair);
    }

    let mut bucket_start = 0.0;
    let bucket_end = buckets[b].upper_bound;
    let mut count = buckets[b].count;
    if b > 0 {
        bucket_start = buckets[b - 1].upper_bound;
        count -= buckets[b - 1].count;
        rank -= buckets[b - 1].count;
    }
    (bucket_start + (bucket_end - bucket_start) * (rank / count), repair)
}

/// Merge buckets sharing an upper bound by summing their counts
///
/// Input must be sorted by bound. Merged buckets are packed at the front;
/// the returned length is the number of distinct bounds.
pub fn coalesce_buckets(buckets: &mut [Bucket]) -> usize {
    if buckets.is_empty() {
        return 0;
    }

    let mut last = buckets[0];
    let mut i = 0;
    for j in 1..buckets.len() {
        let b = buckets[j];
        if b.upper_bound == last.upper_bound {
            last.count += b.count;
        } else {
            buckets[i] = last;
            last = b;
            i += 1;
        }
    }
    buckets[i] = last;
    i + 1
}

/// Force non-decreasing counts
///
/// Differences within `tolerance` (relative) are snapped to the previous
/// count in either direction. Remaining decreases are raised to the
/// previous count. The reference count only advances on a genuine increase.
pub fn ensure_monotonic(buckets: &mut [Bucket], tolerance: f64) -> BucketRepair {
    let mut repair = BucketRepair::default();
    let Some(first) = buckets.first() else {
        return repair;
    };

    let mut prev = first.count;
    for bucket in buckets.iter_mut().skip(1) {
        let curr = bucket.count;
        if curr == prev {
            continue;
        }
        if almost_equal(prev, curr, tolerance) {
            bucket.count = prev;
            repair.fixed_precision = true;
            continue;
        }
        if curr < prev {
            bucket.count = prev;
            repair.forced_monotonic = true;
            continue;
        }
        prev = curr;
    }
    repair
}

/// Relative float comparison
///
/// Two NaNs compare equal. Near zero the comparison becomes absolute,
/// scaled by the smallest normal double.
pub fn almost_equal(a: f64, b: f64, epsilon: f64) -> bool {
    const MIN_NORMAL: f64 = f64::MIN_POSITIVE;

    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }

    let abs_sum = a.abs() + b.abs();
    let diff = (a - b).abs();
    if a == 0.0 || b == 0.0 || abs_sum < MIN_NORMAL {
        return diff < epsilon * MIN_NORMAL;
    }
    diff / abs_sum.min(f64::MAX) < epsilon
}

// ============================================================================
// Float histograms
// ============================================================================

/// A non-cumulative histogram bucket with explicit bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBucket {
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Observations in this bucket only
    pub count: f64,
}

/// A histogram sample with float counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatHistogram {
    /// Total number of observations
    pub count: f64,
    /// Sum of observed values
    pub sum: f64,
    /// Populated buckets, zero bucket included
    pub buckets: Vec<HistogramBucket>,
}

impl FloatHistogram {
    /// Histogram from bucket list, deriving the total count
    pub fn new(sum: f64, buckets: Vec<HistogramBucket>) -> Self {
        let count = buckets.iter().map(|b| b.count).sum();
        Self { count, sum, buckets }
    }
}

/// Estimated standard deviation of the observations
///
/// Library-level helper: series carry float samples only, so no operator
/// evaluates this over a query and lowering rejects it as a function call.
pub fn histogram_stddev(h: &FloatHistogram) -> f64 {
    histogram_variance(h).sqrt()
}

/// Estimated variance of the observations
///
/// Library-level helper like [`histogram_stddev`].
pub fn histogram_stdvar(h: &FloatHistogram) -> f64 {
    histogram_variance(h)
}

fn histogram_variance(h: &FloatHistogram) -> f64 {
    let mean = h.sum / h.count;
    let mut variance = KahanSum::new();

    for bucket in h.buckets.iter().filter(|b| b.count != 0.0) {
        let val = bucket_midpoint(bucket);
        let delta = val - mean;
        variance.add(bucket.count * delta * delta);
    }

    variance.sum() / h.count
}

/// Representative value of a bucket
///
/// Geometric mean of the bounds, sign-corrected for negative buckets, or
/// zero when the bucket spans zero.
fn bucket_midpoint(bucket: &HistogramBucket) -> f64 {
    if bucket.lower <= 0.0 && 0.0 <= bucket.upper {
        return 0.0;
    }
    let val = (bucket.upper * bucket.lower).sqrt();
    if bucket.upper < 0.0 {
        -val
    } else {
        val
    }
}
