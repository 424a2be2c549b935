//! Device statistics
//!
//! Snapshot counters for monitoring and tests. Snapshots are assembled from
//! atomics without stopping the queues, so the numbers are individually
//! accurate but not mutually consistent to one instant.

use serde::Serialize;

use crate::device::QueueId;

/// Counters for one hardware queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Which queue these counters belong to
    pub queue: QueueId,
    /// Jobs accepted by submission entities
    pub submitted: u64,
    /// Jobs handed to the run callback
    pub dispatched: u64,
    /// Jobs whose completion fence has been resolved
    pub completed: u64,
    /// Events executed by the emulation worker
    pub events_processed: u64,
    /// Events currently queued for the worker
    pub pending_events: usize,
}

impl QueueStats {
    /// Jobs currently in flight to hardware (dispatched but not completed)
    pub fn awaiting_hardware(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed)
    }
}

/// Counters for the whole device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    /// Per-queue counters, in bring-up order
    pub queues: Vec<QueueStats>,
}

impl DeviceStats {
    /// Counters for one queue
    pub fn queue(&self, queue: QueueId) -> &QueueStats {
        &self.queues[queue.index()]
    }

    /// Total jobs completed across all queues
    pub fn total_completed(&self) -> u64 {
        self.queues.iter().map(|q| q.completed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceStats {
        DeviceStats {
            queues: vec![
                QueueStats {
                    queue: QueueId::Regular,
                    submitted: 10,
                    dispatched: 8,
                    completed: 6,
                    events_processed: 6,
                    pending_events: 2,
                },
                QueueStats {
                    queue: QueueId::Fast,
                    submitted: 4,
                    dispatched: 4,
                    completed: 4,
                    events_processed: 4,
                    pending_events: 0,
                },
            ],
        }
    }

    #[test]
    fn test_awaiting_hardware() {
        let stats = sample();
        assert_eq!(stats.queue(QueueId::Regular).awaiting_hardware(), 2);
        assert_eq!(stats.queue(QueueId::Fast).awaiting_hardware(), 0);
        assert_eq!(stats.total_completed(), 10);
    }

    #[test]
    fn test_stats_serializable() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"queue\":\"regular\""));
        assert!(json.contains("\"submitted\":10"));
        assert!(json.contains("\"pending_events\":2"));
    }
}
