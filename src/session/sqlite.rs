//! 长期会话存储：SQLite（sqlx 异步连接池）
//!
//! 一行一个会话，state 列保存 ExecutionState 的 JSON。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{check_id, KeyedLocks, SessionError, SessionRecord, SessionStore, SessionTier};
use crate::core::ExecutionState;

pub struct SqliteSessionStore {
    pool: sqlx::sqlite::SqlitePool,
    locks: KeyedLocks,
    turns: KeyedLocks,
}

impl SqliteSessionStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, SessionError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self {
            pool,
            locks: KeyedLocks::new(),
            turns: KeyedLocks::new(),
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_checkpoints (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn tier(&self) -> SessionTier {
        SessionTier::LongTerm
    }

    fn turn_gate(&self) -> &KeyedLocks {
        &self.turns
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        check_id(session_id)?;
        let row = sqlx::query(
            "SELECT state, created_at, updated_at FROM session_checkpoints WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.get("state");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        Ok(Some(SessionRecord {
            session_id: session_id.to_string(),
            state: serde_json::from_str(&state)?,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        }))
    }

    async fn put(&self, session_id: &str, state: &ExecutionState) -> Result<SessionRecord, SessionError> {
        check_id(session_id)?;
        let _guard = self.locks.acquire(session_id).await;

        let previous = self.load(session_id).await.ok().flatten();
        let record = SessionRecord::next(session_id, state, previous.as_ref());
        sqlx::query(
            "INSERT INTO session_checkpoints (id, state, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(serde_json::to_string(&record.state)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        check_id(session_id)?;
        let result = sqlx::query("DELETE FROM session_checkpoints WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
