//! Prefetch task types

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling priority, highest first.
///
/// Declaration order is drain order: the dispatcher empties Urgent before
/// touching High, and so on down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    /// All levels in drain order
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Weight used in worker scoring
    pub fn weight(self) -> f64 {
        match self {
            Priority::Urgent => 1.0,
            Priority::High => 0.8,
            Priority::Medium => 0.6,
            Priority::Low => 0.4,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// Task lifecycle state.
///
/// Queued -> Assigned -> (Succeeded | Failed), or Dropped from Queued when a
/// queue or re-queue bound is hit. Succeeded, Failed, and Dropped are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Assigned,
    Succeeded,
    Failed,
    Dropped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Dropped
        )
    }
}

/// One unit of prefetch work: fetch a chunk of a reel for a user
#[derive(Debug, Clone)]
pub struct PrefetchTask {
    pub id: Uuid,
    pub user_id: String,
    pub reel_id: u64,
    pub chunk_id: u32,
    pub priority: Priority,
    /// Backend call budget for this task
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Times the dispatcher re-queued the task for lack of a worker
    pub requeue_count: u32,
    pub state: TaskState,
    pub created_at: Instant,
    pub completed_at: Option<Instant>,
    pub last_error: Option<String>,
    pub assigned_worker: Option<usize>,
}

impl PrefetchTask {
    pub fn new(
        user_id: impl Into<String>,
        reel_id: u64,
        chunk_id: u32,
        priority: Priority,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            reel_id,
            chunk_id,
            priority,
            timeout,
            retry_count: 0,
            max_retries,
            requeue_count: 0,
            state: TaskState::Queued,
            created_at: Instant::now(),
            completed_at: None,
            last_error: None,
            assigned_worker: None,
        }
    }

    pub fn mark_assigned(&mut self, worker_id: usize) {
        self.state = TaskState::Assigned;
        self.assigned_worker = Some(worker_id);
    }

    pub fn mark_succeeded(&mut self) {
        self.state = TaskState::Succeeded;
        self.completed_at = Some(Instant::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed;
        self.completed_at = Some(Instant::now());
        self.last_error = Some(error.into());
    }

    pub fn mark_dropped(&mut self) {
        self.state = TaskState::Dropped;
        self.completed_at = Some(Instant::now());
    }
}

/// What the pool reports back to the dispatcher for a finished attempt
#[derive(Debug)]
pub enum TaskOutcome {
    /// Terminal: Succeeded or Failed, ready for stats accounting
    Completed(PrefetchTask),
    /// Failed below the retry cap; the dispatcher re-enqueues after the
    /// retry delay
    Retry(PrefetchTask),
}
