//! SQLite-backed message store — survives restarts, supports concurrent
//! access. Timestamps are stored as RFC3339 text, statuses as their wire
//! names.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::MessageStore;
use sendloop_core::types::{Contact, Message, MessageStatus, NewMessage};

/// SQLite persistence for scheduled messages.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the message database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| SendloopError::Store(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| SendloopError::Store(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                contact_name TEXT NOT NULL,
                contact_phone TEXT NOT NULL,
                content TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                created_at TEXT NOT NULL,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_due
                ON messages (status, scheduled_at);
         ",
        )
        .map_err(|e| SendloopError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let scheduled_at: String = row.get(5)?;
        let status: String = row.get(6)?;
        let created_at: String = row.get(7)?;
        Ok(Message {
            id: row.get(0)?,
            user_id: row.get(1)?,
            contact: Contact { name: row.get(2)?, phone: row.get(3)? },
            content: row.get(4)?,
            scheduled_at: parse_ts(&scheduled_at),
            status: MessageStatus::parse(&status).unwrap_or(MessageStatus::FailedWorkerError),
            created_at: parse_ts(&created_at),
            last_error: row.get(8)?,
        })
    }

    /// Check-then-write under one transaction so the transition is atomic
    /// per id even with overlapping callers.
    fn transition(&self, id: &str, status: MessageStatus, reason: Option<&str>) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| SendloopError::Store(format!("Transaction: {e}")))?;

        let current: String = tx
            .query_row("SELECT status FROM messages WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    SendloopError::Store(format!("No such message: {id}"))
                }
                other => SendloopError::Store(format!("Status read: {other}")),
            })?;
        let current = MessageStatus::parse(&current)
            .ok_or_else(|| SendloopError::Store(format!("Corrupt status '{current}' for {id}")))?;

        if !current.can_transition_to(status) {
            return Err(SendloopError::Store(format!(
                "Illegal transition {current} -> {status} for message {id}"
            )));
        }

        match reason {
            Some(reason) => tx.execute(
                "UPDATE messages SET status = ?2, last_error = ?3 WHERE id = ?1",
                params![id, status.as_str(), reason],
            ),
            None => tx.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            ),
        }
        .map_err(|e| SendloopError::Store(format!("Status write: {e}")))?;

        tx.commit()
            .map_err(|e| SendloopError::Store(format!("Commit: {e}")))?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: message.user_id,
            contact: message.contact,
            content: message.content,
            scheduled_at: message.scheduled_at,
            status: MessageStatus::Scheduled,
            created_at: Utc::now(),
            last_error: None,
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages
                (id, user_id, contact_name, contact_phone, content, scheduled_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id,
                message.user_id,
                message.contact.name,
                message.contact.phone,
                message.content,
                message.scheduled_at.to_rfc3339(),
                message.status.as_str(),
                message.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| SendloopError::Store(format!("Insert: {e}")))?;
        tracing::debug!("💾 Message {} stored for {}", message.id, message.scheduled_at);
        Ok(message)
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.lock();
        let result = conn.query_row(
            "SELECT id, user_id, contact_name, contact_phone, content,
                    scheduled_at, status, created_at, last_error
             FROM messages WHERE id = ?1",
            params![id],
            Self::row_to_message,
        );
        match result {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SendloopError::Store(format!("Get: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, contact_name, contact_phone, content,
                        scheduled_at, status, created_at, last_error
                 FROM messages ORDER BY scheduled_at ASC",
            )
            .map_err(|e| SendloopError::Store(format!("List: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_message)
            .map_err(|e| SendloopError::Store(format!("List: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SendloopError::Store(format!("List: {e}")))
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, contact_name, contact_phone, content,
                        scheduled_at, status, created_at, last_error
                 FROM messages
                 WHERE status = 'scheduled' AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC",
            )
            .map_err(|e| SendloopError::Store(format!("Find due: {e}")))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_message)
            .map_err(|e| SendloopError::Store(format!("Find due: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SendloopError::Store(format!("Find due: {e}")))
    }

    async fn set_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        self.transition(id, status, None)
    }

    async fn set_failed(&self, id: &str, status: MessageStatus, reason: &str) -> Result<()> {
        self.transition(id, status, Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(scheduled_at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            user_id: "u1".into(),
            contact: Contact { name: "Grace".into(), phone: "+15550002222".into() },
            content: "reminder".into(),
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let msg = store.insert(draft(Utc::now())).await.unwrap();
        let stored = store.get(&msg.id).await.unwrap().unwrap();
        assert_eq!(stored.contact.phone, "+15550002222");
        assert_eq!(stored.status, MessageStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_find_due_ordering_and_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let later = store.insert(draft(now - Duration::seconds(1))).await.unwrap();
        let earlier = store.insert(draft(now - Duration::minutes(5))).await.unwrap();
        let _future = store.insert(draft(now + Duration::minutes(5))).await.unwrap();

        let due = store.find_due(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, earlier.id);
        assert_eq!(due[1].id, later.id);
    }

    #[tokio::test]
    async fn test_transition_check_is_atomic_with_write() {
        let store = SqliteStore::open_in_memory().unwrap();
        let msg = store.insert(draft(Utc::now())).await.unwrap();

        store.set_status(&msg.id, MessageStatus::Processing).await.unwrap();
        // Cancel after dispatch must not overwrite Processing.
        assert!(store.set_status(&msg.id, MessageStatus::Canceled).await.is_err());
        assert_eq!(
            store.get(&msg.id).await.unwrap().unwrap().status,
            MessageStatus::Processing
        );

        store.set_failed(&msg.id, MessageStatus::Failed, "number not on channel").await.unwrap();
        let stored = store.get(&msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("number not on channel"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(draft(Utc::now())).await.unwrap().id
        };
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.set_status("nope", MessageStatus::Processing).await.is_err());
    }
}
