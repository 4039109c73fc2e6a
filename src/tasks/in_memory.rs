//! In-memory task queue.
//!
//! Suitable for single-instance deployments; tasks do not survive restarts.
//! The reconciliation pass re-derives any state a lost task would have
//! produced, so durability is not a correctness requirement here.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{TaskData, TaskOutcome, TaskQueue};
use crate::error::Result;

#[derive(Clone)]
pub struct InMemoryTaskQueue {
    pending: Arc<Mutex<VecDeque<TaskData>>>,
    running: Arc<Mutex<HashMap<String, TaskData>>>,
    outcomes: Arc<Mutex<HashMap<String, TaskOutcome>>>,
    max_retries: u32,
}

impl InMemoryTaskQueue {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
            max_retries,
        }
    }

    /// Number of tasks waiting to run.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task_type: &str, payload: serde_json::Value) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();
        let data = TaskData::new(
            task_id.clone(),
            task_type.to_string(),
            payload,
            self.max_retries,
        );

        self.pending.lock().await.push_back(data);
        self.outcomes
            .lock()
            .await
            .insert(task_id.clone(), TaskOutcome::Pending);

        Ok(task_id)
    }

    async fn dequeue(&self) -> Result<Option<TaskData>> {
        let mut pending = self.pending.lock().await;
        if let Some(data) = pending.pop_front() {
            self.running
                .lock()
                .await
                .insert(data.task_id.clone(), data.clone());
            self.outcomes
                .lock()
                .await
                .insert(data.task_id.clone(), TaskOutcome::Running);
            Ok(Some(data))
        } else {
            Ok(None)
        }
    }

    async fn complete(&self, task_id: &str) -> Result<()> {
        if self.running.lock().await.remove(task_id).is_some() {
            self.outcomes
                .lock()
                .await
                .insert(task_id.to_string(), TaskOutcome::Completed);
        }
        Ok(())
    }

    async fn fail(&self, task_id: &str, error: String) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(mut data) = running.remove(task_id) {
            if data.should_retry() {
                data.increment_retry();
                self.outcomes
                    .lock()
                    .await
                    .insert(task_id.to_string(), TaskOutcome::Pending);
                self.pending.lock().await.push_back(data);
            } else {
                self.outcomes.lock().await.insert(
                    task_id.to_string(),
                    TaskOutcome::Failed {
                        error,
                        attempts: data.retry_count + 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn outcome(&self, task_id: &str) -> Result<Option<TaskOutcome>> {
        Ok(self.outcomes.lock().await.get(task_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_dequeue_complete() {
        let queue = InMemoryTaskQueue::new(3);
        let id = queue
            .enqueue("notify.checkout_completed", serde_json::json!({"email": "a@b.c"}))
            .await
            .unwrap();

        assert_eq!(queue.outcome(&id).await.unwrap(), Some(TaskOutcome::Pending));

        let data = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(data.task_id, id);
        assert_eq!(queue.outcome(&id).await.unwrap(), Some(TaskOutcome::Running));

        queue.complete(&id).await.unwrap();
        assert_eq!(queue.outcome(&id).await.unwrap(), Some(TaskOutcome::Completed));
    }

    #[tokio::test]
    async fn test_fail_retries_until_exhausted() {
        let queue = InMemoryTaskQueue::new(1);
        let id = queue
            .enqueue("notify.checkout_completed", serde_json::json!({}))
            .await
            .unwrap();

        // First failure re-enqueues.
        queue.dequeue().await.unwrap().unwrap();
        queue.fail(&id, "smtp down".to_string()).await.unwrap();
        assert_eq!(queue.outcome(&id).await.unwrap(), Some(TaskOutcome::Pending));

        // Second failure is terminal.
        queue.dequeue().await.unwrap().unwrap();
        queue.fail(&id, "smtp down".to_string()).await.unwrap();
        assert_eq!(
            queue.outcome(&id).await.unwrap(),
            Some(TaskOutcome::Failed {
                error: "smtp down".to_string(),
                attempts: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_task_has_no_outcome() {
        let queue = InMemoryTaskQueue::default();
        assert_eq!(queue.outcome("nope").await.unwrap(), None);
    }
}
