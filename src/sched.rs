//! Scheduler front end
//!
//! One [`QueueScheduler`] per hardware queue, each with its own dispatcher
//! thread, entity list, fence context, and event queue. Two instances share
//! the implementation but never state, so a stall on one queue cannot affect
//! the other.
//!
//! The dispatcher pulls ready jobs from registered entities (dependency
//! satisfied, credit available), hands them to the run callback, and arms an
//! interrupt-fence callback that resolves the client-visible completion
//! fence, releases the entity credit, and wakes the dispatcher again.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::device::QueueId;
use crate::entity::{Entity, NextJob};
use crate::error::{SchedForgeError, SchedResult};
use crate::event::EventQueue;
use crate::fence::FenceContext;
use crate::job::Job;

struct DispatchSignal {
    generation: u64,
    stop: bool,
}

/// State shared between the dispatcher thread and its wakers
pub(crate) struct SchedShared {
    queue: QueueId,
    ctx: Arc<FenceContext>,
    events: Arc<EventQueue>,
    entities: Mutex<Vec<Weak<Entity>>>,
    signal: Mutex<DispatchSignal>,
    wakeup: Condvar,
    scan_start: AtomicUsize,
    dispatched: AtomicU64,
    completed: AtomicU64,
}

impl SchedShared {
    /// Bump the wake generation and rouse the dispatcher
    ///
    /// Generation + stop flag under one mutex preserves the predicate/stop
    /// double-check: a wake arriving between a scan and the wait is never
    /// lost.
    pub(crate) fn wake(&self) {
        {
            let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
            signal.generation = signal.generation.wrapping_add(1);
        }
        self.wakeup.notify_one();
    }

    fn current_generation(&self) -> u64 {
        self.signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    fn stop_requested(&self) -> bool {
        self.signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop
    }

    /// Park until the generation moves past `seen` or stop is requested;
    /// returns true when the dispatcher should exit
    fn wait_for_wake(&self, seen: u64) -> bool {
        let mut signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        while signal.generation == seen && !signal.stop {
            signal = self
                .wakeup
                .wait(signal)
                .unwrap_or_else(PoisonError::into_inner);
        }
        signal.stop
    }

    /// Snapshot the live entities, pruning dropped ones, rotated so every
    /// entity gets its turn at the head of the scan
    fn live_entities(&self) -> Vec<Arc<Entity>> {
        let mut list = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        list.retain(|weak| weak.strong_count() > 0);
        let mut live: Vec<Arc<Entity>> = list.iter().filter_map(Weak::upgrade).collect();
        drop(list);
        if live.len() > 1 {
            let start = self.scan_start.fetch_add(1, Ordering::Relaxed) % live.len();
            live.rotate_left(start);
        }
        live
    }

    /// Hand one popped job to the run callback and arm its completion path
    fn dispatch(self: &Arc<Self>, entity: &Arc<Entity>, job: Arc<Job>) {
        if let Err(err) = job.mark_dispatched() {
            // Raced with a teardown path; give the credit back.
            warn!(queue = %self.queue, %err, "job vanished before dispatch");
            entity.release_credit();
            return;
        }

        match job.run(&self.ctx, &self.events) {
            Ok(hw_fence) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                trace!(queue = %self.queue, seqno = hw_fence.seqno(), "job dispatched");

                let shared = Arc::clone(self);
                let entity = Arc::clone(entity);
                let completed_job = Arc::clone(&job);
                hw_fence.on_signal(move |status| {
                    if let Err(err) = completed_job.complete(status) {
                        warn!(queue = %shared.queue, %err, "completion raced with teardown");
                    }
                    shared.completed.fetch_add(1, Ordering::Relaxed);
                    entity.release_credit();
                    shared.wake();
                });
            }
            Err(err) => {
                // Setup failed before the event was enqueued: report the
                // failure through the completion fence instead of leaking a
                // half-initialized job.
                warn!(queue = %self.queue, %err, "run callback failed, failing job");
                if let Err(err) = job.fail_dispatch() {
                    warn!(queue = %self.queue, %err, "could not fail dispatched job");
                }
                self.completed.fetch_add(1, Ordering::Relaxed);
                entity.release_credit();
            }
        }
    }
}

/// Per-queue scheduler front end
pub struct QueueScheduler {
    shared: Arc<SchedShared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl QueueScheduler {
    /// Bring up the scheduler for one hardware queue
    pub fn start(
        queue: QueueId,
        ctx: Arc<FenceContext>,
        events: Arc<EventQueue>,
    ) -> SchedResult<Self> {
        let shared = Arc::new(SchedShared {
            queue,
            ctx,
            events,
            entities: Mutex::new(Vec::new()),
            signal: Mutex::new(DispatchSignal {
                generation: 0,
                stop: false,
            }),
            wakeup: Condvar::new(),
            scan_start: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name(format!("sched-{}", queue))
            .spawn(move || dispatcher_loop(thread_shared))
            .map_err(|e| {
                SchedForgeError::Internal(format!("failed to spawn {} dispatcher: {}", queue, e))
            })?;

        debug!(queue = %queue, "scheduler started");
        Ok(QueueScheduler {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    /// Queue this scheduler serves
    pub fn queue(&self) -> QueueId {
        self.shared.queue
    }

    /// Register an entity as a submission source
    ///
    /// The scheduler holds only a weak reference; dropped entities are pruned
    /// on the next scan.
    pub fn register_entity(&self, entity: &Arc<Entity>) {
        debug_assert_eq!(entity.queue(), self.shared.queue);
        self.shared
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(entity));
    }

    /// Rouse the dispatcher after a submission or external state change
    pub fn wake(&self) {
        self.shared.wake();
    }

    /// Jobs handed to the run callback so far
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Jobs whose completion fence has been resolved so far
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Stop the dispatcher thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.dispatcher.take() else {
            return;
        };
        {
            let mut signal = self
                .shared
                .signal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            signal.stop = true;
        }
        self.shared.wakeup.notify_one();
        if handle.join().is_err() {
            warn!(queue = %self.shared.queue, "dispatcher panicked");
        }
        debug!(queue = %self.shared.queue, "scheduler stopped");
    }
}

impl Drop for QueueScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatcher_loop(shared: Arc<SchedShared>) {
    debug!(queue = %shared.queue, "dispatcher started");
    loop {
        // Capture the generation before scanning so a concurrent wake forces
        // a rescan instead of being lost.
        let seen = shared.current_generation();
        if shared.stop_requested() {
            break;
        }

        let mut dispatched_any = false;
        for entity in shared.live_entities() {
            loop {
                match entity.next_ready() {
                    NextJob::Ready(job) => {
                        shared.dispatch(&entity, job);
                        dispatched_any = true;
                    }
                    NextJob::WaitingOnFence(job, fence) => {
                        // Arm exactly one wakeup per job; the fence may
                        // belong to either queue.
                        if job.arm_dep_wake() {
                            let waker = Arc::clone(&shared);
                            fence.on_signal(move |_| waker.wake());
                        }
                        break;
                    }
                    NextJob::Throttled | NextJob::Idle => break,
                }
            }
        }

        if !dispatched_any && shared.wait_for_wake(seen) {
            break;
        }
    }
    debug!(queue = %shared.queue, "dispatcher exited");
}
