//! Emulated device and client sessions
//!
//! A [`Device`] owns exactly two independent hardware queues, `regular` and
//! `fast`, each with its own fence context, event queue, emulation worker,
//! and scheduler front end. Queues never share state; a backlog on one must
//! not delay the other.
//!
//! Clients open a [`Session`], submit jobs (optionally depending on an
//! earlier handle), and wait on the returned [`JobHandle`]. Submission
//! returns immediately with the handle; only execution is asynchronous.
//! Closing a session forcibly finalizes every outstanding handle so nothing
//! leaks even when the client never waits.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::config::DeviceConfig;
use crate::entity::Entity;
use crate::error::{SchedForgeError, SchedResult};
use crate::event::EventQueue;
use crate::fence::{Fence, FenceContext, WaitStatus};
use crate::job::Job;
use crate::sched::QueueScheduler;
use crate::stats::{DeviceStats, QueueStats};
use crate::worker::HwWorker;

/// Number of independent hardware queues
pub const QUEUE_COUNT: usize = 2;

/// One of the device's independent hardware queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueId {
    /// Baseline execution lane
    Regular,
    /// Low-latency execution lane
    Fast,
}

impl QueueId {
    /// All queues, in bring-up order
    pub const ALL: [QueueId; QUEUE_COUNT] = [QueueId::Regular, QueueId::Fast];

    /// Stable index into per-queue arrays
    pub fn index(self) -> usize {
        match self {
            QueueId::Regular => 0,
            QueueId::Fast => 1,
        }
    }

    /// Timeline name of this queue
    pub fn as_str(self) -> &'static str {
        match self {
            QueueId::Regular => "regular",
            QueueId::Fast => "fast",
        }
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueId {
    type Err = SchedForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regular" => Ok(QueueId::Regular),
            "fast" => Ok(QueueId::Fast),
            other => Err(SchedForgeError::InvalidConfiguration(format!(
                "unknown queue: {}",
                other
            ))),
        }
    }
}

/// Opaque handle to a submitted job, scoped to the session that returned it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u32);

impl JobHandle {
    /// Raw handle value, for diagnostics only
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Everything one hardware queue owns
struct QueueState {
    ctx: Arc<FenceContext>,
    events: Arc<EventQueue>,
    sched: QueueScheduler,
    worker: HwWorker,
    submitted: AtomicU64,
}

/// The emulated device: two hardware queues and their workers
pub struct Device {
    config: DeviceConfig,
    queues: [QueueState; QUEUE_COUNT],
}

impl Device {
    /// Bring up the device: fence contexts, event queues, workers, and
    /// schedulers for both hardware queues
    pub fn new(config: DeviceConfig) -> SchedResult<Arc<Self>> {
        config.validate()?;
        info!(?config, "bringing up device");

        let mut queues = Vec::with_capacity(QUEUE_COUNT);
        for queue in QueueId::ALL {
            let ctx = FenceContext::new(queue);
            let events = Arc::new(EventQueue::new(queue, config.event_queue_capacity));
            let worker = HwWorker::spawn(queue, Arc::clone(&events), config.latency_for(queue))?;
            let sched = QueueScheduler::start(queue, Arc::clone(&ctx), Arc::clone(&events))?;
            queues.push(QueueState {
                ctx,
                events,
                sched,
                worker,
                submitted: AtomicU64::new(0),
            });
        }

        let queues: [QueueState; QUEUE_COUNT] = match queues.try_into() {
            Ok(array) => array,
            Err(_) => {
                return Err(SchedForgeError::Internal(
                    "queue bring-up produced wrong count".into(),
                ))
            }
        };

        Ok(Arc::new(Device { config, queues }))
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Open a client session with one submission entity per queue
    pub fn open(self: &Arc<Self>) -> Session {
        let entities = QueueId::ALL.map(|queue| {
            let entity = Entity::new(queue, self.config.credit_limit);
            self.queues[queue.index()].sched.register_entity(&entity);
            entity
        });
        debug!("session opened");
        Session {
            device: Arc::clone(self),
            entities,
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Snapshot per-queue statistics
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            queues: QueueId::ALL
                .map(|queue| {
                    let state = &self.queues[queue.index()];
                    QueueStats {
                        queue,
                        submitted: state.submitted.load(Ordering::Relaxed),
                        dispatched: state.sched.dispatched(),
                        completed: state.sched.completed(),
                        events_processed: state.worker.processed(),
                        pending_events: state.events.len(),
                    }
                })
                .to_vec(),
        }
    }

    fn queue_state(&self, queue: QueueId) -> &QueueState {
        &self.queues[queue.index()]
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        info!("tearing down device");
        // Dispatchers first so no new events appear, then workers, which
        // drain everything already queued before exiting.
        for state in &mut self.queues {
            state.sched.stop();
        }
        for state in &mut self.queues {
            state.worker.stop();
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A client session: per-queue submission entities plus the handle table
pub struct Session {
    device: Arc<Device>,
    entities: [Arc<Entity>; QUEUE_COUNT],
    handles: Mutex<HashMap<u32, Arc<Job>>>,
    next_handle: AtomicU32,
}

impl Session {
    /// Submit a job to `queue`, optionally depending on an earlier handle
    ///
    /// Returns immediately with an opaque handle; the completion fence exists
    /// before this call returns, so completion can never be observed without
    /// a handle to observe it through. The dependency handle, if given, must
    /// still be known to this session (waited-out handles remain valid;
    /// retired ones do not).
    pub fn submit(&self, queue: QueueId, dependency: Option<JobHandle>) -> SchedResult<JobHandle> {
        let dep_fence = match dependency {
            Some(handle) => Some(self.completion_fence(handle)?),
            None => None,
        };
        self.submit_with_fence(queue, dep_fence)
    }

    /// Submit with an explicit dependency fence
    ///
    /// The fence may belong to either queue, or to another session; both
    /// dispositions of a signaled fence satisfy the dependency.
    pub fn submit_with_fence(
        &self,
        queue: QueueId,
        dependency: Option<Arc<Fence>>,
    ) -> SchedResult<JobHandle> {
        let state = self.device.queue_state(queue);
        let job = Job::new(queue, &state.ctx, dependency);
        self.entities[queue.index()].submit(Arc::clone(&job))?;
        state.submitted.fetch_add(1, Ordering::Relaxed);
        state.sched.wake();

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.lock_handles().insert(raw, job);
        trace!(queue = %queue, handle = raw, "job submitted");
        Ok(JobHandle(raw))
    }

    /// Block up to `timeout` for the job's completion fence
    ///
    /// `TimedOut` leaves the handle valid for another wait; `Signaled` and
    /// `Errored` retire it, so a later wait on the same handle reports
    /// `InvalidHandle`.
    pub fn wait(&self, handle: JobHandle, timeout: Duration) -> SchedResult<WaitStatus> {
        let job = self.lookup(handle)?;
        let status = job.done_fence().wait_timeout(timeout);
        match status {
            WaitStatus::TimedOut => {}
            WaitStatus::Signaled | WaitStatus::Errored => {
                self.lock_handles().remove(&handle.raw());
                trace!(handle = handle.raw(), ?status, "handle retired");
            }
        }
        Ok(status)
    }

    /// Export the job's completion fence
    ///
    /// The fence outlives handle retirement; holders may keep waiting on it
    /// after the handle is gone.
    pub fn completion_fence(&self, handle: JobHandle) -> SchedResult<Arc<Fence>> {
        Ok(Arc::clone(self.lookup(handle)?.done_fence()))
    }

    /// Jobs currently in flight to hardware on `queue` from this session
    pub fn in_flight(&self, queue: QueueId) -> usize {
        self.entities[queue.index()].in_flight()
    }

    /// Close the session, finalizing every outstanding handle
    ///
    /// Undispatched jobs are cancelled; dispatched jobs complete through the
    /// regular path before this returns. `Drop` does the same.
    pub fn close(self) {
        drop(self);
    }

    fn lookup(&self, handle: JobHandle) -> SchedResult<Arc<Job>> {
        self.lock_handles()
            .get(&handle.raw())
            .map(Arc::clone)
            .ok_or(SchedForgeError::InvalidHandle(handle.raw()))
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<u32, Arc<Job>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for entity in &self.entities {
            entity.close();
        }
        let outstanding = {
            let mut handles = self.lock_handles();
            let count = handles.len();
            handles.clear();
            count
        };
        debug!(outstanding, "session closed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handles", &self.lock_handles().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_id_roundtrip() {
        for queue in QueueId::ALL {
            let parsed: QueueId = queue.as_str().parse().unwrap();
            assert_eq!(parsed, queue);
        }
        assert!("turbo".parse::<QueueId>().is_err());
    }

    #[test]
    fn test_bring_up_and_tear_down() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let stats = device.stats();
        assert_eq!(stats.queues.len(), QUEUE_COUNT);
        for qs in &stats.queues {
            assert_eq!(qs.submitted, 0);
            assert_eq!(qs.pending_events, 0);
        }
        drop(device);
    }

    #[test]
    fn test_submit_returns_handle_immediately() {
        let device = Device::new(DeviceConfig::default().with_latencies(
            Duration::from_millis(50),
            Duration::from_millis(50),
        ))
        .unwrap();
        let session = device.open();

        let handle = session.submit(QueueId::Regular, None).unwrap();
        // The completion fence is observable before completion.
        let fence = session.completion_fence(handle).unwrap();
        assert_eq!(fence.queue(), QueueId::Regular);

        assert_eq!(
            session.wait(handle, Duration::from_secs(5)).unwrap(),
            WaitStatus::Signaled
        );
    }

    #[test]
    fn test_wait_on_unknown_handle() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let session = device.open();
        let err = session
            .wait(JobHandle(999), Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, SchedForgeError::InvalidHandle(999)));
    }
}
