//! Per-queue event FIFO between the dispatcher and the emulation worker
//!
//! The scheduler's run callback pushes one [`Event`] per dispatched job; the
//! hardware emulation worker pops them strictly in FIFO order. This ordering
//! is the contract the emulation relies on to mimic in-order hardware, so the
//! queue never reorders and the internal lock is held only for the
//! enqueue/dequeue critical section, never across a blocking wait.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::device::QueueId;
use crate::error::{SchedForgeError, SchedResult};
use crate::job::Job;

/// Work item handed from the dispatcher to the emulation worker
#[derive(Debug)]
pub enum Event {
    /// Execute one job. `seqno` is a per-queue diagnostic counter, not an
    /// ordering contract.
    Run { seqno: u64, job: Arc<Job> },
    /// Drain-then-exit sentinel; delivered behind all previously queued work.
    Shutdown,
}

struct EventQueueInner {
    events: VecDeque<Event>,
    next_seqno: u64,
    shutting_down: bool,
}

/// Thread-safe FIFO of pending-completion events for one hardware queue
#[derive(Debug)]
pub struct EventQueue {
    queue: QueueId,
    capacity: usize,
    inner: Mutex<EventQueueInner>,
    ready: Condvar,
}

impl std::fmt::Debug for EventQueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueueInner")
            .field("len", &self.events.len())
            .field("next_seqno", &self.next_seqno)
            .field("shutting_down", &self.shutting_down)
            .finish()
    }
}

impl EventQueue {
    /// Create an event queue bounded at `capacity` outstanding events
    pub fn new(queue: QueueId, capacity: usize) -> Self {
        EventQueue {
            queue,
            capacity,
            inner: Mutex::new(EventQueueInner {
                events: VecDeque::new(),
                next_seqno: 0,
                shutting_down: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a run event for `job`, waking one blocked consumer
    ///
    /// Fails with [`SchedForgeError::EventQueueFull`] at the capacity bound
    /// and [`SchedForgeError::QueueShutDown`] once shutdown has been
    /// requested; in both cases nothing is enqueued.
    pub fn push_job(&self, job: Arc<Job>) -> SchedResult<u64> {
        let seqno = {
            let mut inner = self.lock_inner();
            if inner.shutting_down {
                return Err(SchedForgeError::QueueShutDown(self.queue));
            }
            if inner.events.len() >= self.capacity {
                return Err(SchedForgeError::EventQueueFull(self.queue));
            }
            inner.next_seqno += 1;
            let seqno = inner.next_seqno;
            inner.events.push_back(Event::Run { seqno, job });
            seqno
        };
        self.ready.notify_one();
        Ok(seqno)
    }

    /// Enqueue the shutdown sentinel behind all queued work
    ///
    /// Later pushes are rejected; already queued jobs are still delivered
    /// first, so no job is dropped on shutdown. Idempotent.
    pub fn push_shutdown(&self) {
        {
            let mut inner = self.lock_inner();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
            inner.events.push_back(Event::Shutdown);
        }
        self.ready.notify_one();
    }

    /// Block until an event is available and return it in FIFO order
    pub fn pop_blocking(&self) -> Event {
        let mut inner = self.lock_inner();
        loop {
            if let Some(event) = inner.events.pop_front() {
                return event;
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Number of events currently queued
    pub fn len(&self) -> usize {
        self.lock_inner().events.len()
    }

    /// Whether no events are currently queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Plain-value critical sections; recover the guard on poison.
    fn lock_inner(&self) -> MutexGuard<'_, EventQueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::FenceContext;
    use std::thread;
    use std::time::Duration;

    fn test_job(ctx: &Arc<FenceContext>) -> Arc<Job> {
        Job::new(ctx.queue(), ctx, None)
    }

    #[test]
    fn test_fifo_order() {
        let ctx = FenceContext::new(QueueId::Regular);
        let queue = EventQueue::new(QueueId::Regular, 16);

        let mut seqnos = Vec::new();
        for _ in 0..5 {
            seqnos.push(queue.push_job(test_job(&ctx)).unwrap());
        }

        for expected in seqnos {
            match queue.pop_blocking() {
                Event::Run { seqno, .. } => assert_eq!(seqno, expected),
                Event::Shutdown => panic!("unexpected shutdown event"),
            }
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_delivered_after_queued_work() {
        let ctx = FenceContext::new(QueueId::Fast);
        let queue = EventQueue::new(QueueId::Fast, 16);

        queue.push_job(test_job(&ctx)).unwrap();
        queue.push_job(test_job(&ctx)).unwrap();
        queue.push_shutdown();

        assert!(matches!(queue.pop_blocking(), Event::Run { .. }));
        assert!(matches!(queue.pop_blocking(), Event::Run { .. }));
        assert!(matches!(queue.pop_blocking(), Event::Shutdown));
    }

    #[test]
    fn test_push_after_shutdown_fails() {
        let ctx = FenceContext::new(QueueId::Regular);
        let queue = EventQueue::new(QueueId::Regular, 16);
        queue.push_shutdown();

        let err = queue.push_job(test_job(&ctx)).unwrap_err();
        assert!(matches!(err, SchedForgeError::QueueShutDown(_)));
    }

    #[test]
    fn test_capacity_bound() {
        let ctx = FenceContext::new(QueueId::Regular);
        let queue = EventQueue::new(QueueId::Regular, 2);

        queue.push_job(test_job(&ctx)).unwrap();
        queue.push_job(test_job(&ctx)).unwrap();
        let err = queue.push_job(test_job(&ctx)).unwrap_err();
        assert!(matches!(err, SchedForgeError::EventQueueFull(_)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let ctx = FenceContext::new(QueueId::Fast);
        let queue = Arc::new(EventQueue::new(QueueId::Fast, 16));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking())
        };

        thread::sleep(Duration::from_millis(10));
        queue.push_job(test_job(&ctx)).unwrap();

        assert!(matches!(consumer.join().unwrap(), Event::Run { .. }));
    }
}
