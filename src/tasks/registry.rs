//! Task registry mapping task types to handler functions.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::TaskData;
use crate::error::{Result, SitewardError};

/// Handler functions receive the raw [`TaskData`] and deserialize their own
/// payload; dependencies are captured in the closure.
type TaskHandler = Arc<dyn Fn(TaskData) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Thread-safe mapping from task type strings to handlers.
#[derive(Clone)]
pub struct TaskRegistry {
    handlers: Arc<tokio::sync::RwLock<HashMap<String, TaskHandler>>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler for a task type.
    pub async fn register<F>(&self, task_type: &str, handler: F)
    where
        F: Fn(TaskData) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let handler: TaskHandler = Arc::new(handler);
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_type.to_string(), handler);
    }

    /// Execute a task by looking up its handler.
    ///
    /// Fails if the task type has no registered handler.
    pub async fn execute(&self, data: TaskData) -> Result<()> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&data.task_type).cloned().ok_or_else(|| {
                SitewardError::Internal(format!(
                    "no handler registered for task type: {}",
                    data.task_type
                ))
            })?
        };

        handler(data).await
    }

    pub async fn is_registered(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
