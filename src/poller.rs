//! Client-side wait for a chat task: polls the poll endpoint until the task
//! settles or the attempt ceiling is hit.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::VidharaError;
use crate::poll::{poll_until, OnError, PollPolicy, PollStep};

#[derive(Debug, Deserialize)]
struct PollBody {
    status: String,
    #[serde(default)]
    result: Option<String>,
}

pub struct TaskPoller {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: PollPolicy,
}

impl TaskPoller {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            policy: PollPolicy::new(Duration::from_secs(2), 30),
        }
    }

    pub fn from_config(base_url: impl Into<String>, api_key: impl Into<String>, config: &Config) -> Self {
        Self::new(base_url, api_key).with_policy(PollPolicy::new(
            Duration::from_secs(config.client_poll_interval_secs),
            config.client_poll_max_attempts,
        ))
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn check(&self, task_id: &str) -> Result<PollStep<String>, VidharaError> {
        let resp = self
            .http
            .get(format!("{}/api/chat/poll/{task_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        // 404 carries {"status":"not_found"} and is treated like any other
        // non-terminal answer.
        let body: PollBody = resp.json().await?;
        // A completed record always carries its result; one without is
        // retried like any other unexpected body.
        Ok(match (body.status.as_str(), body.result) {
            ("completed", Some(result)) => PollStep::Done(result),
            ("failed", _) => PollStep::Failed(format!("task {task_id} failed")),
            _ => PollStep::Pending,
        })
    }

    /// Waits for `task_id` to complete and returns its result. Transport
    /// errors and unexpected bodies are retried until the ceiling.
    pub async fn wait(&self, task_id: &str) -> Result<String, VidharaError> {
        poll_until(self.policy, OnError::Retry, |attempt| async move {
            debug!(task_id, attempt, "Polling task");
            self.check(task_id).await
        })
        .await
    }
}
