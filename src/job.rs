//! Job lifecycle
//!
//! A [`Job`] is one client-submitted unit of work. It owns its client-visible
//! completion fence (allocated before submission returns, so the handle
//! always exists before the job can complete), an optional borrowed input
//! dependency fence, and a nullable interrupt fence representing emulated
//! hardware completion.
//!
//! States move `Created -> Submitted -> Dispatched -> AwaitingHardware ->
//! Completed`; `Freed` is the terminal state observed when the last `Arc`
//! holder drops. Shared ownership through `Arc` makes run-after-free
//! unrepresentable, so the state machine only checks logical ordering.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::device::QueueId;
use crate::error::{SchedForgeError, SchedResult};
use crate::event::EventQueue;
use crate::fence::{Fence, FenceContext, FenceStatus};

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Allocated, completion fence handed out, not yet queued
    Created,
    /// Pushed onto its entity's submission FIFO
    Submitted,
    /// Handed to the run callback by the scheduler front end
    Dispatched,
    /// Enqueued in the event queue, waiting for the emulation worker
    AwaitingHardware,
    /// Interrupt fence signaled; completion fence resolved
    Completed,
    /// All references dropped (observed only by `Drop`)
    Freed,
}

/// Status reported by the timeout callback
///
/// The emulation never hangs, so the only status the contract produces is
/// `Nominal` (no recovery action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// No recovery action required
    Nominal,
}

/// A client-submitted unit of work
pub struct Job {
    queue: QueueId,
    state: Mutex<JobState>,
    /// Input dependency; borrowed from the producing job, cleared once it
    /// leaves `Pending`.
    dependency: Mutex<Option<Arc<Fence>>>,
    /// Client-visible completion fence, allocated at creation.
    done_fence: Arc<Fence>,
    /// Emulated hardware completion fence, allocated by `run`.
    hw_fence: Mutex<Option<Arc<Fence>>>,
    /// One-shot guard so the dispatcher arms at most one dependency wakeup.
    dep_wake_armed: std::sync::atomic::AtomicBool,
}

impl Job {
    /// Create a job bound to `queue`, allocating its completion fence
    pub fn new(
        queue: QueueId,
        ctx: &Arc<FenceContext>,
        dependency: Option<Arc<Fence>>,
    ) -> Arc<Self> {
        let done_fence = ctx.create_fence();
        trace!(queue = %queue, seqno = done_fence.seqno(), "job created");
        Arc::new(Job {
            queue,
            state: Mutex::new(JobState::Created),
            dependency: Mutex::new(dependency),
            done_fence,
            hw_fence: Mutex::new(None),
            dep_wake_armed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Queue this job targets
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        *self.lock_state()
    }

    /// Client-visible completion fence
    pub fn done_fence(&self) -> &Arc<Fence> {
        &self.done_fence
    }

    /// Interrupt fence, present once the job has been handed to hardware
    pub fn hw_fence(&self) -> Option<Arc<Fence>> {
        self.hw_fence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The unresolved input dependency, if any
    ///
    /// Returns the dependency fence only while it is still pending. A fence
    /// that signaled with either disposition satisfies the dependency and is
    /// cleared; an errored dependency does not block downstream execution
    /// (error state is informational only).
    pub fn unresolved_dependency(&self) -> Option<Arc<Fence>> {
        let mut dep = self
            .dependency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match dep.as_ref() {
            Some(fence) if !fence.is_signaled() => Some(Arc::clone(fence)),
            Some(_) => {
                *dep = None;
                None
            }
            None => None,
        }
    }

    /// Mark the job queued on its entity (`Created -> Submitted`)
    pub fn mark_submitted(&self) -> SchedResult<()> {
        self.transition(JobState::Created, JobState::Submitted)
    }

    /// Mark the job handed to the run callback (`Submitted -> Dispatched`)
    pub fn mark_dispatched(&self) -> SchedResult<()> {
        self.transition(JobState::Submitted, JobState::Dispatched)
    }

    /// Run callback: hand the job to the hardware emulation path
    ///
    /// Allocates the interrupt fence, enqueues a run event (which retains an
    /// extra job reference for the worker), and returns the interrupt fence
    /// so the caller can track hardware completion independently of the
    /// client-visible fence. If the event cannot be enqueued, nothing is
    /// retained, the interrupt fence allocation is rolled back, and the error
    /// is reported synchronously.
    pub fn run(
        self: &Arc<Self>,
        ctx: &Arc<FenceContext>,
        events: &EventQueue,
    ) -> SchedResult<Arc<Fence>> {
        self.transition(JobState::Dispatched, JobState::AwaitingHardware)?;

        let fence = ctx.create_fence();
        {
            let mut hw = self.hw_fence.lock().unwrap_or_else(PoisonError::into_inner);
            *hw = Some(Arc::clone(&fence));
        }

        if let Err(err) = events.push_job(Arc::clone(self)) {
            // Roll back: no event was enqueued, so nothing can signal the
            // interrupt fence. Restore `Dispatched` so the caller can fail
            // the job through the normal path.
            {
                let mut hw = self.hw_fence.lock().unwrap_or_else(PoisonError::into_inner);
                *hw = None;
            }
            *self.lock_state() = JobState::Dispatched;
            return Err(err);
        }

        trace!(queue = %self.queue, seqno = fence.seqno(), "job handed to hardware");
        Ok(fence)
    }

    /// Emulated hardware completion: signal the interrupt fence
    ///
    /// Invoked by the emulation worker after the latency delay.
    pub fn hw_complete(&self) {
        if let Some(fence) = self.hw_fence() {
            fence.signal();
        }
    }

    /// Resolve the job after its interrupt fence signaled
    /// (`AwaitingHardware -> Completed`)
    ///
    /// The completion fence carries the same disposition the hardware
    /// reported.
    pub fn complete(&self, status: FenceStatus) -> SchedResult<()> {
        self.transition(JobState::AwaitingHardware, JobState::Completed)?;
        match status {
            FenceStatus::Errored => self.done_fence.signal_errored(),
            _ => self.done_fence.signal(),
        };
        trace!(queue = %self.queue, seqno = self.done_fence.seqno(), "job completed");
        Ok(())
    }

    /// Fail a dispatched job whose run callback could not enqueue it
    ///
    /// The completion fence signals errored so external waiters unblock.
    pub fn fail_dispatch(&self) -> SchedResult<()> {
        self.transition(JobState::Dispatched, JobState::Completed)?;
        self.done_fence.signal_errored();
        Ok(())
    }

    /// Finalize a never-dispatched job during session drain
    /// (`Submitted -> Completed` with an errored completion fence)
    pub fn cancel(&self) -> SchedResult<()> {
        self.transition(JobState::Submitted, JobState::Completed)?;
        self.done_fence.signal_errored();
        trace!(queue = %self.queue, seqno = self.done_fence.seqno(), "job cancelled");
        Ok(())
    }

    /// Timeout callback contract: always nominal, the emulation never hangs
    pub fn on_timeout(&self) -> TimeoutStatus {
        TimeoutStatus::Nominal
    }

    pub(crate) fn arm_dep_wake(&self) -> bool {
        !self
            .dep_wake_armed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
    }

    fn transition(&self, from: JobState, to: JobState) -> SchedResult<()> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(SchedForgeError::InvalidStateTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        // Last reference released: the job reaches its terminal state. The
        // fences it owns are released with it; shared holders keep theirs.
        *self.state.get_mut().unwrap_or_else(PoisonError::into_inner) = JobState::Freed;
        trace!(queue = %self.queue, seqno = self.done_fence.seqno(), "job freed");
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("queue", &self.queue)
            .field("state", &self.state())
            .field("seqno", &self.done_fence.seqno())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Arc<FenceContext> {
        FenceContext::new(QueueId::Regular)
    }

    #[test]
    fn test_full_lifecycle() {
        let ctx = ctx();
        let events = EventQueue::new(QueueId::Regular, 16);
        let job = Job::new(QueueId::Regular, &ctx, None);
        assert_eq!(job.state(), JobState::Created);

        job.mark_submitted().unwrap();
        job.mark_dispatched().unwrap();
        let hw = job.run(&ctx, &events).unwrap();
        assert_eq!(job.state(), JobState::AwaitingHardware);
        assert_eq!(events.len(), 1);

        job.hw_complete();
        assert!(hw.is_signaled());

        job.complete(FenceStatus::Signaled).unwrap();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.done_fence().status(), FenceStatus::Signaled);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let ctx = ctx();
        let job = Job::new(QueueId::Regular, &ctx, None);

        // Cannot dispatch a job that was never submitted.
        let err = job.mark_dispatched().unwrap_err();
        assert!(matches!(
            err,
            SchedForgeError::InvalidStateTransition {
                from: JobState::Created,
                to: JobState::Dispatched,
            }
        ));

        // Cannot complete a job that never reached hardware.
        assert!(job.complete(FenceStatus::Signaled).is_err());
    }

    #[test]
    fn test_run_rolls_back_on_full_queue() {
        let ctx = ctx();
        let events = EventQueue::new(QueueId::Regular, 0);
        let job = Job::new(QueueId::Regular, &ctx, None);
        job.mark_submitted().unwrap();
        job.mark_dispatched().unwrap();

        let err = job.run(&ctx, &events).unwrap_err();
        assert!(matches!(err, SchedForgeError::EventQueueFull(_)));
        assert!(job.hw_fence().is_none());
        assert!(events.is_empty());

        // The dispatcher then fails the job synchronously.
        job.fail_dispatch().unwrap();
        assert_eq!(job.done_fence().status(), FenceStatus::Errored);
    }

    #[test]
    fn test_dependency_resolution() {
        let ctx = ctx();
        let dep = ctx.create_fence();
        let job = Job::new(QueueId::Regular, &ctx, Some(Arc::clone(&dep)));

        // Pending dependency blocks.
        assert!(job.unresolved_dependency().is_some());

        // Errored still satisfies the wait.
        dep.signal_errored();
        assert!(job.unresolved_dependency().is_none());
        // Cleared for good.
        assert!(job.unresolved_dependency().is_none());
    }

    #[test]
    fn test_cancel_from_submitted() {
        let ctx = ctx();
        let job = Job::new(QueueId::Regular, &ctx, None);
        job.mark_submitted().unwrap();
        job.cancel().unwrap();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.done_fence().status(), FenceStatus::Errored);
    }

    #[test]
    fn test_on_timeout_is_nominal() {
        let ctx = ctx();
        let job = Job::new(QueueId::Regular, &ctx, None);
        assert_eq!(job.on_timeout(), TimeoutStatus::Nominal);
    }

    #[test]
    fn test_job_freed_exactly_once() {
        let ctx = ctx();
        let job = Job::new(QueueId::Regular, &ctx, None);
        let probe = Arc::downgrade(&job);
        let clone = Arc::clone(&job);
        drop(job);
        assert!(probe.upgrade().is_some());
        drop(clone);
        assert!(probe.upgrade().is_none());
    }
}
