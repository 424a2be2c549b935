//! Hardware emulation worker
//!
//! One worker per hardware queue. The worker consumes run events in FIFO
//! order, emulates execution latency with a plain sleep, and signals the
//! job's interrupt fence, the emulated equivalent of a hardware completion
//! interrupt. Stopping pushes the shutdown sentinel and joins, so every job
//! queued before the stop is still executed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::device::QueueId;
use crate::error::{SchedForgeError, SchedResult};
use crate::event::{Event, EventQueue};

/// Per-queue hardware emulation worker thread
#[derive(Debug)]
pub struct HwWorker {
    queue: QueueId,
    events: Arc<EventQueue>,
    processed: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl HwWorker {
    /// Spawn the worker thread for `queue`
    ///
    /// `latency` is slept before each completion to emulate execution time;
    /// zero means completions are signaled as fast as events arrive.
    pub fn spawn(
        queue: QueueId,
        events: Arc<EventQueue>,
        latency: Duration,
    ) -> SchedResult<Self> {
        let processed = Arc::new(AtomicU64::new(0));

        let thread_events = Arc::clone(&events);
        let thread_processed = Arc::clone(&processed);
        let handle = thread::Builder::new()
            .name(format!("hwq-{}", queue))
            .spawn(move || worker_loop(queue, thread_events, thread_processed, latency))
            .map_err(|e| {
                SchedForgeError::Internal(format!("failed to spawn {} worker: {}", queue, e))
            })?;

        Ok(HwWorker {
            queue,
            events,
            processed,
            handle: Some(handle),
        })
    }

    /// Number of jobs this worker has completed
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stop the worker: enqueue the shutdown sentinel and join
    ///
    /// FIFO delivery guarantees all previously queued jobs are drained before
    /// the worker exits. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        debug!(queue = %self.queue, "stopping hardware emulation worker");
        self.events.push_shutdown();
        if handle.join().is_err() {
            warn!(queue = %self.queue, "hardware emulation worker panicked");
        }
    }
}

impl Drop for HwWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    queue: QueueId,
    events: Arc<EventQueue>,
    processed: Arc<AtomicU64>,
    latency: Duration,
) {
    debug!(queue = %queue, ?latency, "hardware emulation worker started");
    loop {
        match events.pop_blocking() {
            Event::Shutdown => break,
            Event::Run { seqno, job } => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                job.hw_complete();
                processed.fetch_add(1, Ordering::Relaxed);
                trace!(queue = %queue, seqno, "event processed");
            }
        }
    }
    debug!(queue = %queue, processed = processed.load(Ordering::Relaxed),
           "hardware emulation worker exited");
}
