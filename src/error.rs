//! Unified error handling for schedforge
//!
//! This module provides a centralized error type covering the whole engine:
//! - User errors (bad handles, bad configuration, use after close)
//! - Recoverable errors (capacity limits, queues shutting down)
//! - Internal errors (state machine violations, bugs)

use std::fmt;

use crate::device::QueueId;
use crate::job::JobState;

/// Unified error type for schedforge
///
/// All fallible operations in the crate return this type through the
/// [`SchedResult`] alias. Use [`SchedForgeError::category`] to decide how an
/// error should be handled.
#[derive(Debug, thiserror::Error)]
pub enum SchedForgeError {
    // ========== Handle / session errors ==========
    /// Wait or dependency lookup on an unknown or already-retired job handle
    #[error("invalid job handle: {0}")]
    InvalidHandle(u32),

    /// Submission on an entity whose session has been closed
    #[error("submission entity is closed")]
    EntityClosed,

    // ========== Configuration errors ==========
    /// Invalid device configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Queue errors ==========
    /// The event queue for this hardware queue is full
    #[error("event queue full on {0} queue")]
    EventQueueFull(QueueId),

    /// The hardware queue is shutting down and accepts no more work
    #[error("{0} queue is shutting down")]
    QueueShutDown(QueueId),

    // ========== Internal errors ==========
    /// Illegal job state machine transition (indicates a bug)
    #[error("invalid job state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: JobState, to: JobState },

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenient result alias used throughout the crate
pub type SchedResult<T> = Result<T, SchedForgeError>;

impl SchedForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            // User errors - actionable by the caller
            SchedForgeError::InvalidHandle(_)
            | SchedForgeError::EntityClosed
            | SchedForgeError::InvalidConfiguration(_) => ErrorCategory::User,

            // Recoverable errors - temporary conditions
            SchedForgeError::EventQueueFull(_) | SchedForgeError::QueueShutDown(_) => {
                ErrorCategory::Recoverable
            }

            // Internal errors - bugs
            SchedForgeError::InvalidStateTransition { .. } | SchedForgeError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this error is a temporary condition the caller may retry
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }

    /// Check if this is a user-facing error (fix the request, not the engine)
    pub fn is_user_error(&self) -> bool {
        self.category() == ErrorCategory::User
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input, handle, or configuration
    User,
    /// Recoverable error - temporary condition
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "user"),
            ErrorCategory::Recoverable => write!(f, "recoverable"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
