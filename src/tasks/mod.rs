//! Background task system.
//!
//! Webhook handlers push side effects (notifications, anything slow) onto a
//! queue and a worker drains it, so the HTTP response never waits on them.
//! Every enqueued task has a trackable outcome; nothing is fire-and-forget.

mod in_memory;
mod registry;
mod worker;

pub use in_memory::InMemoryTaskQueue;
pub use registry::TaskRegistry;
pub use worker::TaskWorker;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task that has been enqueued, with retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub task_id: String,
    /// Task type identifier, e.g. "notify.checkout_completed".
    pub task_type: String,
    /// Serialized task payload (JSON).
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl TaskData {
    #[must_use]
    pub fn new(task_id: String, task_type: String, payload: serde_json::Value, max_retries: u32) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
        }
    }

    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }
}

/// Terminal and in-flight states of a tracked task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    Running,
    Completed,
    Failed { error: String, attempts: u32 },
}

/// Queue backend for background tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task for execution. Returns the task ID for tracking.
    async fn enqueue(&self, task_type: &str, payload: serde_json::Value) -> Result<String>;

    /// Dequeue the next available task, moving it to a running state.
    async fn dequeue(&self) -> Result<Option<TaskData>>;

    /// Mark a running task as completed.
    async fn complete(&self, task_id: &str) -> Result<()>;

    /// Mark a running task as failed. The queue decides whether to retry.
    async fn fail(&self, task_id: &str, error: String) -> Result<()>;

    /// Look up the current outcome of a task. `None` for unknown IDs.
    async fn outcome(&self, task_id: &str) -> Result<Option<TaskOutcome>>;
}
