//! Status board for long-running work that callers poll for.
//!
//! Each board owns a key namespace (`task`, `transcription`) and writes
//! records with a fixed TTL. A record starts as `processing` and is moved once
//! to `completed` or `failed`; after the TTL it reads as absent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::VidharaError;
use crate::status_store::StatusStore;
use crate::types::TaskRecord;

pub const CHAT_TASK_NAMESPACE: &str = "task";
pub const TRANSCRIPTION_TASK_NAMESPACE: &str = "transcription";

#[derive(Clone)]
pub struct TaskBoard {
    store: Arc<dyn StatusStore>,
    namespace: &'static str,
    ttl: Duration,
}

impl TaskBoard {
    pub fn new(store: Arc<dyn StatusStore>, namespace: &'static str, ttl: Duration) -> Self {
        Self {
            store,
            namespace,
            ttl,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn key(&self, task_id: &str) -> String {
        format!("{}:{task_id}", self.namespace)
    }

    async fn put(&self, task_id: &str, record: &TaskRecord) -> Result<(), VidharaError> {
        let value = serde_json::to_string(record)?;
        self.store.set(&self.key(task_id), &value, self.ttl).await
    }

    /// Allocates a fresh task id and records it as `processing`.
    pub async fn create(&self) -> Result<String, VidharaError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.put(&task_id, &TaskRecord::Processing).await?;
        Ok(task_id)
    }

    pub async fn complete(&self, task_id: &str, result: String) -> Result<(), VidharaError> {
        self.put(task_id, &TaskRecord::Completed(result)).await
    }

    pub async fn fail(&self, task_id: &str) -> Result<(), VidharaError> {
        self.put(task_id, &TaskRecord::Failed).await
    }

    /// Marks the task failed, logging instead of returning a store error.
    pub async fn fail_quietly(&self, task_id: &str) {
        if let Err(e) = self.fail(task_id).await {
            warn!(namespace = self.namespace, task_id, error = %e, "Failed to mark task failed");
        }
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, VidharaError> {
        match self.store.get(&self.key(task_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Creates a task, awaits `work` and records its outcome.
    ///
    /// Returns the task id with the work's result; the board already holds
    /// `completed` or `failed` when this returns. The id is `None` when the
    /// task could not be created, in which case `work` never runs.
    pub async fn run<F, Fut>(&self, work: F) -> (Option<String>, Result<String, VidharaError>)
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String, VidharaError>>,
    {
        let task_id = match self.create().await {
            Ok(id) => id,
            Err(e) => return (None, Err(e)),
        };
        let outcome = work(task_id.clone()).await;
        match &outcome {
            Ok(result) => {
                if let Err(e) = self.complete(&task_id, result.clone()).await {
                    warn!(namespace = self.namespace, task_id = %task_id, error = %e, "Failed to record completion");
                    return (Some(task_id), Err(e));
                }
                info!(namespace = self.namespace, task_id = %task_id, "Task completed");
            }
            Err(e) => {
                warn!(namespace = self.namespace, task_id = %task_id, error = %e, "Task failed");
                self.fail_quietly(&task_id).await;
            }
        }
        (Some(task_id), outcome)
    }
}
