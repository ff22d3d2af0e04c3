//! Error types for the prefetch scheduler
//!
//! Nothing in the scheduler is fatal to the process: capacity problems drop
//! speculative work, backend problems retry then fail the individual task, and
//! configuration problems reject the change while keeping the prior value.

/// Scheduler operation error types
///
/// This enum combines the simplicity of pattern matching with enough metadata
/// to log a useful message at the point of failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// A tunable was given an invalid value; prior configuration is retained
    InvalidConfig(String),
    /// A malformed event was rejected at ingestion with no session mutation
    InvalidEvent(String),
    /// A bounded queue or cache refused the newest item
    CapacityExceeded(String),
    /// A backend bridge call failed
    BridgeError(String),
    /// The component has been shut down and no longer accepts work
    ShuttingDown,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            SchedulerError::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
            SchedulerError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            SchedulerError::BridgeError(msg) => write!(f, "Bridge error: {}", msg),
            SchedulerError::ShuttingDown => write!(f, "Scheduler is shutting down"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create configuration error
    #[inline(always)]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create event validation error
    #[inline(always)]
    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }

    /// Create capacity error
    #[inline(always)]
    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    /// Create bridge error
    #[inline(always)]
    pub fn bridge_error(msg: impl Into<String>) -> Self {
        Self::BridgeError(msg.into())
    }
}
