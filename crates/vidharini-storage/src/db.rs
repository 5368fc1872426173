use rusqlite::OptionalExtension;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use vidharini_core::error::VidharaError;

pub struct Database {
    conn: Mutex<Connection>,
}

pub async fn call_blocking<T, F>(db: Arc<Database>, f: F) -> Result<T, VidharaError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, VidharaError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| VidharaError::Join(format!("DB task join error: {e}")))?
}

/// RFC 3339 with fixed microsecond precision so stored timestamps sort
/// lexicographically.
pub fn now_timestamp() -> String {
    timestamp_of(chrono::Utc::now())
}

pub fn timestamp_of(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    /// JSON-encoded attachment list, when the message carried files.
    pub files: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Duplicate,
    ChatMissing,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub queue_name: String,
    pub payload: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub locked_until: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ApiKeyOwner {
    pub key_id: i64,
    pub user_id: String,
}

pub const DEFAULT_QUEUE_MAX_ATTEMPTS: i64 = 3;

impl Database {
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn new(data_dir: &str) -> Result<Self, VidharaError> {
        let db_path = Path::new(data_dir).join("vidharini.db");
        std::fs::create_dir_all(data_dir)?;

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                label TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                prefix TEXT NOT NULL,
                created_at TEXT NOT NULL,
                revoked_at TEXT,
                last_used_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chats_user_updated
                ON chats(user_id, updated_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                files TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_created
                ON messages(chat_id, created_at);

            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                locked_until TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_name_status
                ON queue(queue_name, status, id);

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT,
                embedding_model TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memories (
                user_id TEXT NOT NULL,
                memory_key TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                value TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                confidence REAL NOT NULL,
                PRIMARY KEY (user_id, memory_key, memory_type)
            );

            CREATE TABLE IF NOT EXISTS memory_owners (
                user_id TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_kv_entries_expiry
                ON kv_entries(expires_at_ms);",
        )?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    // --- Users and API keys ---

    pub fn create_user(&self, user_id: &str, display_name: &str) -> Result<(), VidharaError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO users(id, display_name, created_at) VALUES(?1, ?2, ?3)",
            params![user_id, display_name, now_timestamp()],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, VidharaError> {
        let conn = self.lock_conn();
        let user = conn
            .query_row(
                "SELECT id, display_name, created_at FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Removes the user row only. Their keys keep resolving to the missing
    /// user so callers can tell a stale key from an unknown one.
    pub fn delete_user(&self, user_id: &str) -> Result<bool, VidharaError> {
        let conn = self.lock_conn();
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(rows > 0)
    }

    pub fn create_api_key(
        &self,
        user_id: &str,
        label: &str,
        key_hash: &str,
        prefix: &str,
    ) -> Result<i64, VidharaError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO api_keys(user_id, label, key_hash, prefix, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![user_id, label, key_hash, prefix, now_timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn revoke_api_key(&self, key_id: i64) -> Result<bool, VidharaError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            "UPDATE api_keys
             SET revoked_at = COALESCE(revoked_at, ?2)
             WHERE id = ?1",
            params![key_id, now_timestamp()],
        )?;
        Ok(rows > 0)
    }

    pub fn validate_api_key_hash(&self, key_hash: &str) -> Result<Option<ApiKeyOwner>, VidharaError> {
        let conn = self.lock_conn();
        let owner = conn
            .query_row(
                "SELECT id, user_id FROM api_keys
                 WHERE key_hash = ?1 AND revoked_at IS NULL
                 LIMIT 1",
                params![key_hash],
                |r| {
                    Ok(ApiKeyOwner {
                        key_id: r.get(0)?,
                        user_id: r.get(1)?,
                    })
                },
            )
            .optional()?;
        if let Some(owner) = &owner {
            let _ = conn.execute(
                "UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1",
                params![owner.key_id, now_timestamp()],
            );
        }
        Ok(owner)
    }

    // --- Chats and messages ---

    pub fn create_chat(&self, chat_id: &str, user_id: &str, title: &str) -> Result<ChatRecord, VidharaError> {
        let conn = self.lock_conn();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO chats(id, user_id, title, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?4)",
            params![chat_id, user_id, title, now],
        )?;
        Ok(ChatRecord {
            id: chat_id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>, VidharaError> {
        let conn = self.lock_conn();
        let chat = conn
            .query_row(
                "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = ?1",
                params![chat_id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    pub fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRecord>, VidharaError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at
             FROM chats
             WHERE user_id = ?1
             ORDER BY updated_at ASC, id ASC",
        )?;
        let chats = stmt
            .query_map(params![user_id], row_to_chat)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    /// Advances `updated_at` to now unless it is already later.
    pub fn touch_chat(&self, chat_id: &str) -> Result<bool, VidharaError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
            params![chat_id, now_timestamp()],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_chat(&self, chat_id: &str) -> Result<bool, VidharaError> {
        let conn = self.lock_conn();
        let rows = conn.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        Ok(rows > 0)
    }

    /// Appends a message unless one with the same id already exists.
    /// The owning chat's `updated_at` moves forward on insert.
    pub fn store_message_if_absent(&self, msg: &StoredMessage) -> Result<StoreOutcome, VidharaError> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;

        let chat_exists = tx
            .query_row(
                "SELECT 1 FROM chats WHERE id = ?1",
                params![msg.chat_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !chat_exists {
            return Ok(StoreOutcome::ChatMissing);
        }

        let inserted = tx.execute(
            "INSERT INTO messages (id, chat_id, role, content, files, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                msg.id,
                msg.chat_id,
                msg.role,
                msg.content,
                msg.files,
                msg.created_at,
            ],
        )?;
        if inserted == 0 {
            return Ok(StoreOutcome::Duplicate);
        }
        tx.execute(
            "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
            params![msg.chat_id, msg.created_at],
        )?;
        tx.commit()?;
        Ok(StoreOutcome::Inserted)
    }

    pub fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>, VidharaError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, files, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let messages = stmt
            .query_map(params![chat_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    files: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn count_messages(&self, chat_id: &str) -> Result<i64, VidharaError> {
        let conn = self.lock_conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    // --- Durable job queue ---

    pub fn enqueue_job(&self, queue_name: &str, payload: &str) -> Result<i64, VidharaError> {
        let conn = self.lock_conn();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO queue (queue_name, payload, max_attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![queue_name, payload, DEFAULT_QUEUE_MAX_ATTEMPTS, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Leases the oldest runnable entry: a pending one, or a processing one
    /// whose lock has lapsed (its worker died mid-job).
    pub fn dequeue_job(
        &self,
        queue_name: &str,
        lease: chrono::Duration,
    ) -> Result<Option<QueueEntry>, VidharaError> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let now = chrono::Utc::now();
        let now_ts = timestamp_of(now);

        let entry = tx
            .query_row(
                "SELECT id, queue_name, payload, status, attempts, max_attempts, last_error,
                        created_at, updated_at, locked_until
                 FROM queue
                 WHERE queue_name = ?1
                   AND (status = 'pending'
                        OR (status = 'processing' AND locked_until < ?2))
                 ORDER BY id ASC
                 LIMIT 1",
                params![queue_name, now_ts],
                |row| {
                    Ok(QueueEntry {
                        id: row.get(0)?,
                        queue_name: row.get(1)?,
                        payload: row.get(2)?,
                        status: row.get(3)?,
                        attempts: row.get(4)?,
                        max_attempts: row.get(5)?,
                        last_error: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                        locked_until: row.get(9)?,
                    })
                },
            )
            .optional()?;

        let Some(entry) = entry else {
            tx.commit()?;
            return Ok(None);
        };

        let locked_until = timestamp_of(now + lease);
        tx.execute(
            "UPDATE queue SET status = 'processing', locked_until = ?2, updated_at = ?3
             WHERE id = ?1",
            params![entry.id, locked_until, now_ts],
        )?;
        tx.commit()?;

        Ok(Some(QueueEntry {
            status: "processing".to_string(),
            locked_until: Some(locked_until),
            updated_at: now_ts,
            ..entry
        }))
    }

    pub fn ack_job(&self, id: i64) -> Result<(), VidharaError> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE queue SET status = 'completed', locked_until = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now_timestamp()],
        )?;
        Ok(())
    }

    /// Records a failed attempt. Returns true when the entry has used up its
    /// attempts and is now parked as `failed`.
    pub fn fail_job(&self, id: i64, error: &str) -> Result<bool, VidharaError> {
        let conn = self.lock_conn();
        let (attempts, max_attempts): (i64, i64) = conn.query_row(
            "SELECT attempts, max_attempts FROM queue WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let new_attempts = attempts + 1;
        let exhausted = new_attempts >= max_attempts;
        let status = if exhausted { "failed" } else { "pending" };
        conn.execute(
            "UPDATE queue SET status = ?1, attempts = ?2, last_error = ?3,
             locked_until = NULL, updated_at = ?4
             WHERE id = ?5",
            params![status, new_attempts, error, now_timestamp(), id],
        )?;
        Ok(exhausted)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<QueueEntry>, VidharaError> {
        let conn = self.lock_conn();
        let entry = conn
            .query_row(
                "SELECT id, queue_name, payload, status, attempts, max_attempts, last_error,
                        created_at, updated_at, locked_until
                 FROM queue WHERE id = ?1",
                params![id],
                |row| {
                    Ok(QueueEntry {
                        id: row.get(0)?,
                        queue_name: row.get(1)?,
                        payload: row.get(2)?,
                        status: row.get(3)?,
                        attempts: row.get(4)?,
                        max_attempts: row.get(5)?,
                        last_error: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                        locked_until: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Entries still waiting to run or mid-run.
    pub fn queue_depth(&self, queue_name: &str) -> Result<i64, VidharaError> {
        let conn = self.lock_conn();
        let depth = conn.query_row(
            "SELECT COUNT(*) FROM queue
             WHERE queue_name = ?1 AND status IN ('pending', 'processing')",
            params![queue_name],
            |r| r.get(0),
        )?;
        Ok(depth)
    }

    // --- Indexed documents ---

    pub fn insert_document(&self, doc: &IndexedDocument) -> Result<(), VidharaError> {
        let embedding = doc
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO documents
                (id, file_id, file_name, content, embedding, embedding_model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.id,
                doc.file_id,
                doc.file_name,
                doc.content,
                embedding,
                doc.embedding_model,
                doc.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_documents(&self) -> Result<Vec<IndexedDocument>, VidharaError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, file_name, content, embedding, embedding_model, created_at
             FROM documents
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, file_id, file_name, content, embedding, embedding_model, created_at) in rows {
            // A row with an unreadable vector still serves lexical matching.
            let embedding = embedding.and_then(|raw| serde_json::from_str::<Vec<f32>>(&raw).ok());
            out.push(IndexedDocument {
                id,
                file_id,
                file_name,
                content,
                embedding,
                embedding_model,
                created_at,
            });
        }
        Ok(out)
    }

    // --- Key/value entries with expiry ---

    pub fn kv_set(&self, key: &str, value: &str, expires_at_ms: i64) -> Result<(), VidharaError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO kv_entries(key, value, expires_at_ms) VALUES(?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at_ms = excluded.expires_at_ms",
            params![key, value, expires_at_ms],
        )?;
        Ok(())
    }

    /// Reads a live entry. An expired one is deleted on the way.
    pub fn kv_get(&self, key: &str, now_ms: i64) -> Result<Option<String>, VidharaError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM kv_entries WHERE key = ?1 AND expires_at_ms <= ?2",
            params![key, now_ms],
        )?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn kv_purge_expired(&self, now_ms: i64) -> Result<usize, VidharaError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            "DELETE FROM kv_entries WHERE expires_at_ms <= ?1",
            params![now_ms],
        )?;
        Ok(rows)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
