//! Key/value board with per-entry expiry, used to publish task status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use vidharini_core::error::VidharaError;

use crate::db::{call_blocking, Database};

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value and restarting
    /// its expiry clock.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), VidharaError>;

    /// Returns the live value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, VidharaError>;

    /// Drops every expired entry and reports how many were removed.
    async fn purge_expired(&self) -> Result<usize, VidharaError>;

    fn backend(&self) -> &'static str;
}

fn unix_millis_after(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp_millis().saturating_add(ttl_ms)
}

pub struct SqliteStatusStore {
    db: Arc<Database>,
}

impl SqliteStatusStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), VidharaError> {
        let key = key.to_string();
        let value = value.to_string();
        let expires_at_ms = unix_millis_after(ttl);
        call_blocking(self.db.clone(), move |db| {
            db.kv_set(&key, &value, expires_at_ms)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, VidharaError> {
        let key = key.to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();
        call_blocking(self.db.clone(), move |db| db.kv_get(&key, now_ms)).await
    }

    async fn purge_expired(&self) -> Result<usize, VidharaError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        call_blocking(self.db.clone(), move |db| db.kv_purge_expired(now_ms)).await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// Process-local board. Entries vanish on restart.
#[derive(Default)]
pub struct MemoryStatusStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), VidharaError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, VidharaError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<usize, VidharaError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - entries.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
