//! Concurrent - runs a child on a worker thread with bounded read-ahead
//!
//! The worker pulls batches from the child and pushes them into a bounded
//! channel of `buffer_size` slots, so at most that many batches are in
//! flight ahead of the consumer. The consumer waits on the channel in short
//! slices and checks the context between them, so a cancelled query stops
//! waiting promptly even when the child is blocked upstream.

use super::{BoxedOperator, Explanation, StepVector, VectorOperator, VectorPool};
use crate::query::error::{QueryError, Result};
use crate::query::executor::ExecutionContext;
use crate::types::Labels;
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default number of batches buffered ahead of the consumer
pub const DEFAULT_BUFFER_SIZE: usize = 2;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

type Batch = Result<Option<Vec<StepVector>>>;

/// Pulls a child on a separate thread
pub struct ConcurrentOperator {
    child: Arc<Mutex<BoxedOperator>>,
    pool: Arc<VectorPool>,
    buffer_size: usize,
    series: Option<Arc<[Labels]>>,
    receiver: Option<Receiver<Batch>>,
    done: bool,
}

impl ConcurrentOperator {
    /// Wrap `child`, buffering up to `buffer_size` batches
    pub fn new(child: BoxedOperator, buffer_size: usize) -> Self {
        let pool = Arc::clone(child.pool());
        Self {
            child: Arc::new(Mutex::new(child)),
            pool,
            buffer_size: buffer_size.max(1),
            series: None,
            receiver: None,
            done: false,
        }
    }

    fn start(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let (tx, rx) = sync_channel::<Batch>(self.buffer_size);
        let child = Arc::clone(&self.child);
        let ctx = ctx.clone();

        thread::Builder::new()
            .name("stepwise-concurrent".to_string())
            .spawn(move || loop {
                let out = child.lock().next(&ctx);
                let last = !matches!(out, Ok(Some(_)));
                // receiver gone: the consumer stopped reading
                if tx.send(out).is_err() || last {
                    break;
                }
            })
            .map_err(|e| QueryError::internal("failed to spawn concurrent worker").with_source(e))?;

        self.receiver = Some(rx);
        Ok(())
    }

    fn recv(&self, ctx: &ExecutionContext) -> Batch {
        let Some(rx) = &self.receiver else {
            return Err(QueryError::internal("concurrent worker not started"));
        };
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(batch) => return batch,
                Err(RecvTimeoutError::Timeout) => ctx.check()?,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(QueryError::internal("concurrent worker exited unexpectedly"))
                },
            }
        }
    }
}

impl VectorOperator for ConcurrentOperator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Vec<StepVector>>> {
        if self.done {
            return Ok(None);
        }
        ctx.check()?;
        if self.receiver.is_none() {
            self.start(ctx)?;
        }

        let out = self.recv(ctx);
        if !matches!(out, Ok(Some(_))) {
            self.done = true;
            self.receiver = None;
        }
        out
    }

    fn series(&mut self, ctx: &ExecutionContext) -> Result<Arc<[Labels]>> {
        if let Some(series) = &self.series {
            return Ok(Arc::clone(series));
        }
        let series = self.child.lock().series(ctx)?;
        self.series = Some(Arc::clone(&series));
        Ok(series)
    }

    fn pool(&self) -> &Arc<VectorPool> {
        &self.pool
    }

    fn explain(&self) -> Explanation {
        Explanation::with_children(
            format!("[concurrent(buff={})]", self.buffer_size),
            vec![self.child.lock().explain()],
        )
    }
}
