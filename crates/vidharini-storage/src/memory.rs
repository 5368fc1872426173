//! Per-user personal details remembered across chats.
//!
//! Items are grouped by key (`name`, `email`, ...) and by type within a key.
//! A write to an existing `(key, type)` only lands when its confidence is
//! strictly higher than the stored one. A user's whole memory expires
//! [`MEMORY_RETENTION_DAYS`] after the last write.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use vidharini_core::error::VidharaError;

use crate::db::{now_timestamp, timestamp_of, Database};

pub const MEMORY_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_MEMORY_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryItem {
    #[serde(rename = "type")]
    pub memory_type: String,
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryWrite {
    Inserted,
    Replaced,
    KeptExisting,
}

impl Database {
    pub fn store_memory(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        memory_type: &str,
        confidence: f64,
    ) -> Result<MemoryWrite, VidharaError> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let now = chrono::Utc::now();

        purge_if_expired(&tx, user_id, &timestamp_of(now))?;

        let existing: Option<f64> = tx
            .query_row(
                "SELECT confidence FROM memories
                 WHERE user_id = ?1 AND memory_key = ?2 AND memory_type = ?3",
                params![user_id, key, memory_type],
                |r| r.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(stored) if confidence <= stored => MemoryWrite::KeptExisting,
            Some(_) => MemoryWrite::Replaced,
            None => MemoryWrite::Inserted,
        };

        if outcome != MemoryWrite::KeptExisting {
            tx.execute(
                "INSERT INTO memories(user_id, memory_key, memory_type, value, timestamp, confidence)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, memory_key, memory_type) DO UPDATE SET
                    value = excluded.value,
                    timestamp = excluded.timestamp,
                    confidence = excluded.confidence",
                params![
                    user_id,
                    key,
                    memory_type,
                    value,
                    now.timestamp_millis(),
                    confidence
                ],
            )?;
        }

        // Any write, kept or not, pushes the expiry out.
        let expires_at = timestamp_of(now + chrono::Duration::days(MEMORY_RETENTION_DAYS));
        tx.execute(
            "INSERT INTO memory_owners(user_id, expires_at) VALUES(?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET expires_at = excluded.expires_at",
            params![user_id, expires_at],
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_memories(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<String, Vec<MemoryItem>>, VidharaError> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        purge_if_expired(&tx, user_id, &now_timestamp())?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT memory_key, memory_type, value, timestamp, confidence
                 FROM memories
                 WHERE user_id = ?1
                 ORDER BY memory_key ASC, memory_type ASC",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        MemoryItem {
                            memory_type: row.get(1)?,
                            value: row.get(2)?,
                            timestamp: row.get(3)?,
                            confidence: row.get(4)?,
                        },
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.commit()?;

        let mut grouped: BTreeMap<String, Vec<MemoryItem>> = BTreeMap::new();
        for (key, item) in rows {
            grouped.entry(key).or_default().push(item);
        }
        Ok(grouped)
    }
}

fn purge_if_expired(
    conn: &rusqlite::Connection,
    user_id: &str,
    now: &str,
) -> Result<(), VidharaError> {
    let expired = conn
        .query_row(
            "SELECT 1 FROM memory_owners WHERE user_id = ?1 AND expires_at <= ?2",
            params![user_id, now],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if expired {
        conn.execute("DELETE FROM memories WHERE user_id = ?1", params![user_id])?;
        conn.execute("DELETE FROM memory_owners WHERE user_id = ?1", params![user_id])?;
    }
    Ok(())
}
