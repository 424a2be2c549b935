//! Device configuration
//!
//! [`DeviceConfig`] controls the per-entity credit limit, the event queue
//! capacity, and the emulated execution latency of each hardware queue.

use std::time::Duration;

use crate::device::QueueId;
use crate::error::{SchedForgeError, SchedResult};

/// Configuration for an emulated device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Maximum jobs in flight to hardware per entity (typically 1 or 16)
    pub credit_limit: usize,

    /// Maximum outstanding events per hardware queue
    pub event_queue_capacity: usize,

    /// Emulated execution latency of the regular queue
    pub regular_latency: Duration,

    /// Emulated execution latency of the fast queue
    pub fast_latency: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            credit_limit: 1,
            event_queue_capacity: 1024,
            regular_latency: Duration::from_micros(150),
            fast_latency: Duration::from_micros(20),
        }
    }
}

impl DeviceConfig {
    /// Create a new device config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-entity credit limit
    pub fn with_credit_limit(mut self, credit_limit: usize) -> Self {
        self.credit_limit = credit_limit;
        self
    }

    /// Set the event queue capacity
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Set both emulation latencies at once
    pub fn with_latencies(mut self, regular: Duration, fast: Duration) -> Self {
        self.regular_latency = regular;
        self.fast_latency = fast;
        self
    }

    /// Set the regular queue emulation latency
    pub fn with_regular_latency(mut self, latency: Duration) -> Self {
        self.regular_latency = latency;
        self
    }

    /// Set the fast queue emulation latency
    pub fn with_fast_latency(mut self, latency: Duration) -> Self {
        self.fast_latency = latency;
        self
    }

    /// Emulation latency configured for `queue`
    pub fn latency_for(&self, queue: QueueId) -> Duration {
        match queue {
            QueueId::Regular => self.regular_latency,
            QueueId::Fast => self.fast_latency,
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> SchedResult<()> {
        if self.credit_limit == 0 {
            return Err(SchedForgeError::InvalidConfiguration(
                "credit_limit must be at least 1".into(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(SchedForgeError::InvalidConfiguration(
                "event_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_default() {
        let config = DeviceConfig::default();
        assert_eq!(config.credit_limit, 1);
        assert_eq!(config.event_queue_capacity, 1024);
        assert!(config.fast_latency < config.regular_latency);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::new()
            .with_credit_limit(16)
            .with_event_queue_capacity(64)
            .with_regular_latency(Duration::from_millis(2))
            .with_fast_latency(Duration::from_micros(50));

        assert_eq!(config.credit_limit, 16);
        assert_eq!(config.event_queue_capacity, 64);
        assert_eq!(config.latency_for(QueueId::Regular), Duration::from_millis(2));
        assert_eq!(config.latency_for(QueueId::Fast), Duration::from_micros(50));
    }

    #[test]
    fn test_device_config_validation() {
        let err = DeviceConfig::new().with_credit_limit(0).validate().unwrap_err();
        assert!(matches!(err, SchedForgeError::InvalidConfiguration(_)));

        let err = DeviceConfig::new()
            .with_event_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchedForgeError::InvalidConfiguration(_)));
    }
}
