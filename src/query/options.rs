//! Evaluation parameters shared by the optimizer, lowering and operators

use crate::query::error::{QueryError, Result};
use crate::types::TimeRange;

/// Default lookback window for selectors (5 minutes)
pub const DEFAULT_LOOKBACK_DELTA_MS: i64 = 5 * 60 * 1000;

/// Default number of steps produced per `next` call
pub const DEFAULT_STEPS_BATCH: usize = 10;

/// Options for evaluating one query
///
/// Timestamps are milliseconds since the epoch. An instant query is a range
/// query with `start == end` and a step of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// First evaluation timestamp (inclusive)
    pub start: i64,
    /// Last evaluation timestamp (inclusive)
    pub end: i64,
    /// Distance between evaluation timestamps
    pub step: i64,
    /// How far back a selector looks for the latest sample
    pub lookback_delta: i64,
    /// Maximum number of steps per operator batch
    pub steps_batch: usize,
    /// Whether operators record telemetry for analysis
    pub enable_analysis: bool,
}

impl QueryOptions {
    /// Options for a single evaluation timestamp
    pub fn instant(t: i64) -> Self {
        Self {
            start: t,
            end: t,
            step: 0,
            lookback_delta: DEFAULT_LOOKBACK_DELTA_MS,
            steps_batch: DEFAULT_STEPS_BATCH,
            enable_analysis: false,
        }
    }

    /// Options for a range evaluation
    pub fn range(start: i64, end: i64, step: i64) -> Result<Self> {
        TimeRange::new(start, end)?;
        if step <= 0 {
            return Err(QueryError::validation(format!(
                "range query step must be positive, got {}",
                step
            )));
        }
        let span = end.checked_sub(start).ok_or_else(|| {
            QueryError::validation(format!("range [{}, {}] is too wide to evaluate", start, end))
        })?;
        if usize::try_from(span / step).ok().and_then(|n| n.checked_add(1)).is_none() {
            return Err(QueryError::validation(format!(
                "range [{}, {}] with step {} has too many steps",
                start, end, step
            )));
        }
        if start.checked_sub(DEFAULT_LOOKBACK_DELTA_MS).is_none() {
            return Err(QueryError::validation(format!(
                "range start {} leaves no room for the lookback window",
                start
            )));
        }
        Ok(Self {
            start,
            end,
            step,
            lookback_delta: DEFAULT_LOOKBACK_DELTA_MS,
            steps_batch: DEFAULT_STEPS_BATCH,
            enable_analysis: false,
        })
    }

    /// Set the lookback delta
    pub fn with_lookback_delta(mut self, lookback_delta: i64) -> Self {
        if lookback_delta > 0 {
            self.lookback_delta = lookback_delta;
        }
        self
    }

    /// Set the number of steps per batch
    pub fn with_steps_batch(mut self, steps_batch: usize) -> Self {
        self.steps_batch = steps_batch.max(1);
        self
    }

    /// Enable or disable telemetry
    pub fn with_analysis(mut self, enabled: bool) -> Self {
        self.enable_analysis = enabled;
        self
    }

    /// Whether this is an instant evaluation
    pub fn is_instant(&self) -> bool {
        self.step == 0
    }

    /// Total number of evaluation steps
    pub fn num_steps(&self) -> usize {
        if self.is_instant() {
            return 1;
        }
        if self.end < self.start {
            return 0;
        }
        let steps = self.end.abs_diff(self.start) / self.step.unsigned_abs();
        usize::try_from(steps).map_or(usize::MAX, |n| n.saturating_add(1))
    }

    /// Timestamp of evaluation step `step`
    ///
    /// Saturates at the `i64` bounds; validated ranges never reach them.
    pub fn step_timestamp(&self, step: usize) -> i64 {
        let offset = i64::try_from(step).unwrap_or(i64::MAX).saturating_mul(self.step);
        self.start.saturating_add(offset)
    }

    /// Oldest timestamp a selector reads, clamped at `i64::MIN`
    pub fn lookback_start(&self) -> i64 {
        self.start.saturating_sub(self.lookback_delta)
    }

    /// Evaluation window as a time range
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}
