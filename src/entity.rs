//! Submission entities
//!
//! An [`Entity`] is the per-session, per-queue ordered submission point. It
//! keeps jobs in strict submission order and enforces the in-flight credit
//! limit: at most `credit_limit` jobs from one entity are in flight to
//! hardware at any instant; the rest wait in the FIFO without reordering.
//!
//! The entity lock is independent of the event queue lock, so submissions on
//! one queue never contend with the other queue's hot path.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::device::QueueId;
use crate::error::{SchedForgeError, SchedResult};
use crate::fence::Fence;
use crate::job::Job;

/// What the dispatcher should do with this entity right now
#[derive(Debug)]
pub enum NextJob {
    /// Head job popped and charged one credit; hand it to the run callback
    Ready(Arc<Job>),
    /// Head job is blocked on a pending dependency fence
    WaitingOnFence(Arc<Job>, Arc<Fence>),
    /// Credit limit reached; retry after a completion releases a credit
    Throttled,
    /// Nothing pending
    Idle,
}

struct EntityInner {
    pending: VecDeque<Arc<Job>>,
    in_flight: usize,
    closed: bool,
}

/// Per-session, per-queue ordered submission point
pub struct Entity {
    queue: QueueId,
    credit_limit: usize,
    inner: Mutex<EntityInner>,
    /// Notified whenever `in_flight` drops; `close` waits on it.
    idle: Condvar,
}

impl Entity {
    /// Create an entity bound to `queue` with the given credit limit
    pub fn new(queue: QueueId, credit_limit: usize) -> Arc<Self> {
        Arc::new(Entity {
            queue,
            credit_limit,
            inner: Mutex::new(EntityInner {
                pending: VecDeque::new(),
                in_flight: 0,
                closed: false,
            }),
            idle: Condvar::new(),
        })
    }

    /// Queue this entity is bound to
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Configured credit limit
    pub fn credit_limit(&self) -> usize {
        self.credit_limit
    }

    /// Jobs currently in flight to hardware from this entity
    pub fn in_flight(&self) -> usize {
        self.lock_inner().in_flight
    }

    /// Jobs queued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.lock_inner().pending.len()
    }

    /// Append a job to the submission FIFO; never blocks
    pub fn submit(&self, job: Arc<Job>) -> SchedResult<()> {
        job.mark_submitted()?;
        let mut inner = self.lock_inner();
        if inner.closed {
            return Err(SchedForgeError::EntityClosed);
        }
        inner.pending.push_back(job);
        trace!(queue = %self.queue, depth = inner.pending.len(), "job submitted to entity");
        Ok(())
    }

    /// Dispatcher pull: pop the head job if credit is available and its
    /// dependency is satisfied
    ///
    /// A returned [`NextJob::Ready`] has already been charged one credit;
    /// the dispatcher must eventually pair it with [`Entity::release_credit`].
    pub fn next_ready(&self) -> NextJob {
        let mut inner = self.lock_inner();
        // Head-of-line only: jobs on one entity are never reordered.
        let head = match inner.pending.front() {
            Some(job) => Arc::clone(job),
            None => return NextJob::Idle,
        };
        if inner.in_flight >= self.credit_limit {
            return NextJob::Throttled;
        }
        if let Some(dep) = head.unresolved_dependency() {
            return NextJob::WaitingOnFence(head, dep);
        }
        inner.pending.pop_front();
        inner.in_flight += 1;
        NextJob::Ready(head)
    }

    /// Return one credit after a dispatched job completed
    pub fn release_credit(&self) {
        {
            let mut inner = self.lock_inner();
            debug_assert!(inner.in_flight > 0);
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.idle.notify_all();
    }

    /// Close the entity at session teardown
    ///
    /// Jobs never dispatched are finalized immediately through
    /// [`Job::cancel`]; jobs already in flight are allowed to complete
    /// normally, and this call blocks until they have.
    pub fn close(&self) {
        let drained: Vec<Arc<Job>> = {
            let mut inner = self.lock_inner();
            if inner.closed && inner.pending.is_empty() && inner.in_flight == 0 {
                return;
            }
            inner.closed = true;
            inner.pending.drain(..).collect()
        };

        if !drained.is_empty() {
            debug!(queue = %self.queue, count = drained.len(),
                   "cancelling undispatched jobs at entity close");
        }
        for job in drained {
            // A job the dispatcher popped concurrently is no longer in the
            // FIFO, so everything drained here is still `Submitted`.
            if let Err(err) = job.cancel() {
                debug!(queue = %self.queue, %err, "drained job not cancellable");
            }
        }

        // In-flight jobs complete through the regular path.
        let mut inner = self.lock_inner();
        while inner.in_flight > 0 {
            inner = self
                .idle
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether the entity has been closed
    pub fn is_closed(&self) -> bool {
        self.lock_inner().closed
    }

    fn lock_inner(&self) -> MutexGuard<'_, EntityInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("Entity")
            .field("queue", &self.queue)
            .field("credit_limit", &self.credit_limit)
            .field("pending", &inner.pending.len())
            .field("in_flight", &inner.in_flight)
            .field("closed", &inner.closed)
            .finish()
    }
}
