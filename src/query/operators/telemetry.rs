//! Operator telemetry for query analysis
//!
//! Two strategies share one trait: [`NoopTelemetry`] records nothing and
//! reports zeros, [`TrackedTelemetry`] accumulates execution time and
//! per-step sample counts. The strategy is picked once per operator by
//! [`new_telemetry`]; call sites never branch on whether analysis is on.
//!
//! [`Observed`] decorates an operator with a telemetry instance. It passes
//! every batch through untouched and only records metadata alongside.

use super::{BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::query::error::Result;
use crate::query::executor::ExecutionContext;
use crate::types::Labels;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sample counters of one operator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySamples {
    /// Samples across all steps
    pub total_samples: i64,
    /// Largest number of samples in a single step
    pub peak_samples: i64,
    /// Samples per step index
    pub total_samples_per_step: Vec<i64>,
}

impl QuerySamples {
    /// Add samples for a step index
    pub fn increment_samples_at_step(&mut self, step: usize, samples: i64) {
        self.total_samples += samples;
        if self.total_samples_per_step.len() <= step {
            self.total_samples_per_step.resize(step + 1, 0);
        }
        self.total_samples_per_step[step] += samples;
    }

    /// Raise the peak if `samples` exceeds it
    pub fn update_peak(&mut self, samples: i64) {
        self.peak_samples = self.peak_samples.max(samples);
    }
}

/// Point-in-time copy of an operator's telemetry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    /// Operator name
    pub name: String,
    /// Total time spent in `next` and `series`
    pub execution_time: Duration,
    /// Sample counters
    pub samples: QuerySamples,
}

/// Recording capability for one operator
pub trait OperatorTelemetry: Send {
    /// Operator name
    fn name(&self) -> &str;

    /// Add time spent producing output
    fn add_execution_time_taken(&mut self, elapsed: Duration);

    /// Total recorded time
    fn execution_time_taken(&self) -> Duration;

    /// Add samples produced at a step index
    fn increment_samples_at_step(&mut self, samples: usize, step: usize);

    /// Record a step's sample count as a peak candidate
    fn update_peak(&mut self, samples: usize);

    /// Sample counters
    fn samples(&self) -> QuerySamples;

    /// Copy of everything recorded so far
    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            name: self.name().to_string(),
            execution_time: self.execution_time_taken(),
            samples: self.samples(),
        }
    }
}

/// Pick the telemetry strategy for an operator
pub fn new_telemetry(name: impl Into<String>, enabled: bool) -> Box<dyn OperatorTelemetry> {
    if enabled {
        Box::new(TrackedTelemetry::new(name))
    } else {
        Box::new(NoopTelemetry::new(name))
    }
}

/// Telemetry that records nothing
#[derive(Debug, Clone)]
pub struct NoopTelemetry {
    name: String,
}

impl NoopTelemetry {
    /// Create a no-op recorder
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl OperatorTelemetry for NoopTelemetry {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_execution_time_taken(&mut self, _: Duration) {}

    fn execution_time_taken(&self) -> Duration {
        Duration::ZERO
    }

    fn increment_samples_at_step(&mut self, _: usize, _: usize) {}

    fn update_peak(&mut self, _: usize) {}

    fn samples(&self) -> QuerySamples {
        QuerySamples::default()
    }
}

/// Telemetry accumulating time and sample counts
#[derive(Debug, Clone)]
pub struct TrackedTelemetry {
    name: String,
    execution_time: Duration,
    loaded_samples: QuerySamples,
}

impl TrackedTelemetry {
    /// Create a tracking recorder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_time: Duration::ZERO,
            loaded_samples: QuerySamples::default(),
        }
    }
}

impl OperatorTelemetry for TrackedTelemetry {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_execution_time_taken(&mut self, elapsed: Duration) {
        self.execution_time += elapsed;
    }

    fn execution_time_taken(&self) -> Duration {
        self.execution_time
    }

    fn increment_samples_at_step(&mut self, samples: usize, step: usize) {
        self.loaded_samples
            .increment_samples_at_step(step, samples as i64);
    }

    fn update_peak(&mut self, samples: usize) {
        self.loaded_samples.update_peak(samples as i64);
    }

    fn samples(&self) -> QuerySamples {
        self.loaded_samples.clone()
    }
}

// ============================================================================
// Observed decorator
// ============================================================================

/// Operator wrapper feeding a telemetry recorder
pub struct Observed {
    inner: BoxedOperator,
    telemetry: Box<dyn OperatorTelemetry>,
    steps_seen: usize,
}

impl Observed {
    /// Wrap `inner`, recording with `telemetry`
    pub fn new(inner: BoxedOperator, telemetry: Box<dyn OperatorTelemetry>) -> Self {
        Self {
            inner,
            telemetry,
            steps_seen: 0,
        }
    }

    /// Wrap `inner` with the strategy chosen by `enabled`
    pub fn wrap(inner: BoxedOperator, name: &str, enabled: bool) -> BoxedOperator {
        Box::new(Self::new(inner, new_telemetry(name, enabled)))
    }

    fn record(&mut self, batch: &[StepVector]) {
        for vector in batch {
            self.telemetry
                .increment_samples_at_step(vector.len(), self.steps_seen);
            self.telemetry.update_peak(vector.len());
            self.steps_seen += 1;
        }
    }
}

impl VectorOperator for Observed {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        let start = Instant::now();
        let out = self.inner.next(ctx);
        self.telemetry.add_execution_time_taken(start.elapsed());

        if let Ok(Some(batch)) = &out {
            self.record(batch);
        }
        out
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        let start = Instant::now();
        let out = self.inner.series(ctx);
        self.telemetry.add_execution_time_taken(start.elapsed());
        out
    }

    fn pool(&self) -> &Arc<VectorPool> {
        self.inner.pool()
    }

    fn explain(&self) -> Explanation {
        let mut explanation = self.inner.explain();
        explanation.telemetry = Some(self.telemetry.snapshot());
        explanation
    }
}
