//! Completion fences
//!
//! A [`Fence`] is a one-shot completion token: it starts `Pending` and
//! transitions exactly once to `Signaled` or `Errored`. Fences are shared
//! between the dispatcher, the hardware emulation worker, and client wait
//! paths through `Arc`; the last holder to drop frees the fence.
//!
//! Every hardware queue owns a [`FenceContext`] which hands out strictly
//! increasing sequence numbers. Contexts are created at queue bring-up and
//! dropped at teardown, so sequence numbering never leaks across device
//! instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::device::QueueId;

/// Status of a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// Not yet signaled
    Pending,
    /// Signaled: the associated work completed
    Signaled,
    /// Signaled with an error disposition
    Errored,
}

/// Outcome of a timed wait on a fence or job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The fence signaled completion within the timeout
    Signaled,
    /// The fence signaled an error within the timeout
    Errored,
    /// The timeout elapsed while the fence was still pending
    TimedOut,
}

/// Callback invoked once when a fence leaves `Pending`
pub type FenceCallback = Box<dyn FnOnce(FenceStatus) + Send>;

/// Per-queue fence allocation context
///
/// Owns the monotonically increasing sequence counter for one hardware
/// queue. Sequence numbers are never reused within a context.
#[derive(Debug)]
pub struct FenceContext {
    queue: QueueId,
    next_seqno: AtomicU64,
}

impl FenceContext {
    /// Create a fresh context for one hardware queue
    pub fn new(queue: QueueId) -> Arc<Self> {
        Arc::new(FenceContext {
            queue,
            next_seqno: AtomicU64::new(0),
        })
    }

    /// Queue this context belongs to
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Allocate a new pending fence with the next sequence number
    pub fn create_fence(&self) -> Arc<Fence> {
        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(queue = %self.queue, seqno, "fence created");
        Arc::new(Fence {
            queue: self.queue,
            seqno,
            state: Mutex::new(FenceState {
                status: FenceStatus::Pending,
                callbacks: Vec::new(),
            }),
            signaled: Condvar::new(),
        })
    }

    /// Sequence number that the next fence will receive
    pub fn emitted(&self) -> u64 {
        self.next_seqno.load(Ordering::Relaxed)
    }
}

struct FenceState {
    status: FenceStatus,
    callbacks: Vec<FenceCallback>,
}

/// A one-shot, shared completion signal
pub struct Fence {
    queue: QueueId,
    seqno: u64,
    state: Mutex<FenceState>,
    signaled: Condvar,
}

impl Fence {
    /// Queue this fence belongs to (its timeline name)
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    /// Sequence number within the owning queue context
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Current status snapshot
    pub fn status(&self) -> FenceStatus {
        self.lock_state().status
    }

    /// Whether the fence has left `Pending`
    pub fn is_signaled(&self) -> bool {
        self.status() != FenceStatus::Pending
    }

    /// Signal completion
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// fence had already been signaled. Completion is funneled through a
    /// single owner, so `false` only ever means a harmless repeat.
    pub fn signal(&self) -> bool {
        self.transition(FenceStatus::Signaled)
    }

    /// Signal with an error disposition
    ///
    /// Waiters observe [`WaitStatus::Errored`]; dependency resolution treats
    /// an errored fence the same as a signaled one.
    pub fn signal_errored(&self) -> bool {
        self.transition(FenceStatus::Errored)
    }

    fn transition(&self, status: FenceStatus) -> bool {
        debug_assert_ne!(status, FenceStatus::Pending);
        let callbacks = {
            let mut state = self.lock_state();
            if state.status != FenceStatus::Pending {
                return false;
            }
            state.status = status;
            std::mem::take(&mut state.callbacks)
        };
        // All waiters wake; among-waiter ordering is unspecified.
        self.signaled.notify_all();
        trace!(queue = %self.queue, seqno = self.seqno, ?status, "fence signaled");
        // Callbacks run outside the lock so they may retake it freely.
        for cb in callbacks {
            cb(status);
        }
        true
    }

    /// Block the calling thread until the fence signals or `timeout` elapses
    ///
    /// Multiple concurrent waiters are allowed; all observe the same outcome.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitStatus {
        let state = self.lock_state();
        let (state, result) = self
            .signaled
            .wait_timeout_while(state, timeout, |s| s.status == FenceStatus::Pending)
            .unwrap_or_else(PoisonError::into_inner);
        match state.status {
            FenceStatus::Signaled => WaitStatus::Signaled,
            FenceStatus::Errored => WaitStatus::Errored,
            FenceStatus::Pending => {
                debug_assert!(result.timed_out());
                WaitStatus::TimedOut
            }
        }
    }

    /// Register a callback to run once when the fence leaves `Pending`
    ///
    /// If the fence has already signaled, the callback runs immediately on
    /// the calling thread.
    pub fn on_signal<F>(&self, callback: F)
    where
        F: FnOnce(FenceStatus) + Send + 'static,
    {
        let status = {
            let mut state = self.lock_state();
            if state.status == FenceStatus::Pending {
                state.callbacks.push(Box::new(callback));
                return;
            }
            state.status
        };
        callback(status);
    }

    // Critical sections only ever store plain values, so a panicking peer
    // cannot leave the state inconsistent; recover the guard on poison.
    fn lock_state(&self) -> MutexGuard<'_, FenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("queue", &self.queue)
            .field("seqno", &self.seqno)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_seqnos_strictly_increase() {
        let ctx = FenceContext::new(QueueId::Regular);
        let a = ctx.create_fence();
        let b = ctx.create_fence();
        let c = ctx.create_fence();
        assert!(a.seqno() < b.seqno());
        assert!(b.seqno() < c.seqno());
        assert_eq!(ctx.emitted(), 3);
    }

    #[test]
    fn test_signal_is_one_shot() {
        let ctx = FenceContext::new(QueueId::Fast);
        let fence = ctx.create_fence();
        assert_eq!(fence.status(), FenceStatus::Pending);

        assert!(fence.signal());
        assert_eq!(fence.status(), FenceStatus::Signaled);

        // Second transition attempts are no-ops.
        assert!(!fence.signal());
        assert!(!fence.signal_errored());
        assert_eq!(fence.status(), FenceStatus::Signaled);
    }

    #[test]
    fn test_errored_is_distinct() {
        let ctx = FenceContext::new(QueueId::Regular);
        let fence = ctx.create_fence();
        assert!(fence.signal_errored());
        assert_eq!(fence.status(), FenceStatus::Errored);
        assert_eq!(
            fence.wait_timeout(Duration::from_millis(10)),
            WaitStatus::Errored
        );
    }

    #[test]
    fn test_wait_times_out_while_pending() {
        let ctx = FenceContext::new(QueueId::Regular);
        let fence = ctx.create_fence();
        assert_eq!(
            fence.wait_timeout(Duration::from_millis(5)),
            WaitStatus::TimedOut
        );
        // Still pending and retryable.
        assert_eq!(fence.status(), FenceStatus::Pending);
    }

    #[test]
    fn test_all_waiters_observe_signal() {
        let ctx = FenceContext::new(QueueId::Fast);
        let fence = ctx.create_fence();

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let f = Arc::clone(&fence);
            waiters.push(thread::spawn(move || {
                f.wait_timeout(Duration::from_secs(5))
            }));
        }

        thread::sleep(Duration::from_millis(10));
        assert!(fence.signal());

        for w in waiters {
            assert_eq!(w.join().unwrap(), WaitStatus::Signaled);
        }
    }

    #[test]
    fn test_callback_runs_on_signal() {
        let ctx = FenceContext::new(QueueId::Regular);
        let fence = ctx.create_fence();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        fence.on_signal(move |status| {
            assert_eq!(status, FenceStatus::Signaled);
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        fence.signal();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Registered after the fact: runs immediately.
        let h = Arc::clone(&hits);
        fence.on_signal(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fence_freed_after_last_release() {
        let ctx = FenceContext::new(QueueId::Regular);
        let fence = ctx.create_fence();
        let probe = Arc::downgrade(&fence);

        let clone = Arc::clone(&fence);
        fence.signal();
        drop(fence);
        assert!(probe.upgrade().is_some());
        drop(clone);
        assert!(probe.upgrade().is_none());
    }
}
