//! schedforge - GPU-style command scheduler with an emulated hardware backend
//!
//! A minimal job-scheduling and completion-signaling engine for validating a
//! command scheduler against emulated hardware. Clients submit jobs into one
//! of two independent hardware queues; the engine orders, dispatches,
//! "executes" (a latency emulation), and signals completion through
//! fence handles. Submission returns immediately; completion is observed
//! later through a timed wait, and the two queues make progress concurrently
//! without interfering with each other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use schedforge::{Device, DeviceConfig, QueueId, WaitStatus};
//!
//! let device = Device::new(DeviceConfig::default()).unwrap();
//! let session = device.open();
//!
//! let producer = session.submit(QueueId::Fast, None).unwrap();
//! let consumer = session.submit(QueueId::Regular, Some(producer)).unwrap();
//!
//! let status = session.wait(consumer, Duration::from_secs(1)).unwrap();
//! assert_eq!(status, WaitStatus::Signaled);
//! ```

pub mod config;
pub mod device;
pub mod entity;
pub mod error;
pub mod event;
pub mod fence;
pub mod job;
pub mod logging;
pub mod sched;
pub mod stats;
pub mod worker;

pub use config::DeviceConfig;
pub use device::{Device, JobHandle, QueueId, Session, QUEUE_COUNT};
pub use entity::Entity;
pub use error::{ErrorCategory, SchedForgeError, SchedResult};
pub use event::{Event, EventQueue};
pub use fence::{Fence, FenceContext, FenceStatus, WaitStatus};
pub use job::{Job, JobState, TimeoutStatus};
pub use logging::{init_logging_from_env, init_with_config, LoggingConfig};
pub use sched::QueueScheduler;
pub use stats::{DeviceStats, QueueStats};
pub use worker::HwWorker;
