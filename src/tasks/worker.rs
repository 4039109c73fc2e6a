//! Worker loop that drains the task queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use super::{TaskQueue, TaskRegistry};
use crate::error::Result;

/// A single worker that polls the queue and runs tasks through the registry.
pub struct TaskWorker {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskRegistry>,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskWorker {
    pub fn new(queue: Arc<dyn TaskQueue>, registry: Arc<TaskRegistry>) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                queue,
                registry,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Returns a handle that can request shutdown from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until a shutdown signal arrives. The task in flight when the
    /// signal lands is allowed to finish.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!("task worker started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("task worker shutting down");
                    break;
                }
                result = self.process_next() => {
                    match result {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(Duration::from_millis(100)) => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "task worker poll failed");
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(Duration::from_secs(1)) => {}
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("task worker stopped");
    }

    async fn process_next(&self) -> Result<Option<String>> {
        let data = match self.queue.dequeue().await? {
            Some(data) => data,
            None => return Ok(None),
        };

        let task_id = data.task_id.clone();
        tracing::debug!(task_id = %task_id, task_type = %data.task_type, "running task");

        match self.registry.execute(data).await {
            Ok(()) => {
                self.queue.complete(&task_id).await?;
                Ok(Some(task_id))
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "task failed");
                self.queue.fail(&task_id, e.to_string()).await?;
                Ok(Some(task_id))
            }
        }
    }
}
