//! Background persistence of assistant replies.
//!
//! The chat handler enqueues a `store-message` job once a reply has finished
//! streaming; a single worker drains the queue and appends the message. Jobs
//! are delivered at least once, so each carries the message id and the insert
//! ignores ids that already exist.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{call_blocking, now_timestamp, Database, QueueEntry, StoreOutcome, StoredMessage};
use crate::error::VidharaError;
use crate::types::Role;

pub const MESSAGE_QUEUE: &str = "message-queue";
pub const STORE_MESSAGE_JOB: &str = "store-message";

/// Lease held on a job while it runs. A worker that dies mid-job releases
/// it implicitly once this lapses.
const JOB_LEASE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMessageJob {
    pub message_id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobEnvelope {
    name: String,
    data: serde_json::Value,
}

pub async fn enqueue_store_message(
    db: Arc<Database>,
    job: &StoreMessageJob,
) -> Result<i64, VidharaError> {
    let payload = serde_json::to_string(&JobEnvelope {
        name: STORE_MESSAGE_JOB.to_string(),
        data: serde_json::to_value(job)?,
    })?;
    let id = call_blocking(db, move |db| db.enqueue_job(MESSAGE_QUEUE, &payload)).await?;
    debug!(job_id = id, chat_id = %job.chat_id, message_id = %job.message_id, "Enqueued store-message");
    Ok(id)
}

fn decode_job(entry: &QueueEntry) -> Result<StoreMessageJob, VidharaError> {
    let envelope: JobEnvelope = serde_json::from_str(&entry.payload)?;
    if envelope.name != STORE_MESSAGE_JOB {
        return Err(VidharaError::InvalidRequest(format!(
            "unknown job type: {}",
            envelope.name
        )));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

fn store_job(db: &Database, job: StoreMessageJob) -> Result<StoreOutcome, VidharaError> {
    db.store_message_if_absent(&StoredMessage {
        id: job.message_id,
        chat_id: job.chat_id,
        role: job.role.as_str().to_string(),
        content: job.content,
        files: None,
        created_at: now_timestamp(),
    })
}

/// Leases and processes at most one job. Returns `false` when the queue was
/// empty.
pub async fn process_next(db: Arc<Database>) -> Result<bool, VidharaError> {
    let lease = chrono::Duration::seconds(JOB_LEASE_SECS);
    let Some(entry) =
        call_blocking(db.clone(), move |db| db.dequeue_job(MESSAGE_QUEUE, lease)).await?
    else {
        return Ok(false);
    };

    let job_id = entry.id;
    let outcome = match decode_job(&entry) {
        Ok(job) => call_blocking(db.clone(), move |db| store_job(db, job)).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(StoreOutcome::Inserted) => {
            debug!(job_id, "Stored assistant message");
            call_blocking(db, move |db| db.ack_job(job_id)).await?;
        }
        Ok(StoreOutcome::Duplicate) => {
            debug!(job_id, "Message already stored, acknowledging redelivery");
            call_blocking(db, move |db| db.ack_job(job_id)).await?;
        }
        Ok(StoreOutcome::ChatMissing) => {
            // Chat deleted while the reply was streaming; nothing to attach to.
            warn!(job_id, "Chat no longer exists, dropping message");
            call_blocking(db, move |db| db.ack_job(job_id)).await?;
        }
        Err(e) => {
            let reason = e.to_string();
            let exhausted = call_blocking(db, move |db| db.fail_job(job_id, &reason)).await?;
            if exhausted {
                error!(job_id, error = %e, "store-message job failed permanently");
            } else {
                warn!(job_id, error = %e, "store-message job failed, will retry");
            }
        }
    }
    Ok(true)
}

/// Processes jobs until the queue is empty. Returns how many were handled.
pub async fn drain(db: Arc<Database>) -> Result<usize, VidharaError> {
    let mut handled = 0;
    while process_next(db.clone()).await? {
        handled += 1;
    }
    Ok(handled)
}

/// Runs the worker until `shutdown` flips to true. The job in hand is always
/// finished before the loop exits.
pub fn spawn_queue_worker(
    db: Arc<Database>,
    idle_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(queue = MESSAGE_QUEUE, "Queue worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let busy = match process_next(db.clone()).await {
                Ok(busy) => busy,
                Err(e) => {
                    error!(error = %e, "Queue worker iteration failed");
                    false
                }
            };
            if busy {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(idle_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(queue = MESSAGE_QUEUE, "Queue worker stopped");
    })
}
