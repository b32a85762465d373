//! 长期会话存储：每个会话一个 JSON 文件
//!
//! 写入先落临时文件再 rename，读取方不会看到写了一半的检查点；同一会话的写入按键串行。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{check_id, KeyedLocks, SessionError, SessionRecord, SessionStore, SessionTier};
use crate::core::ExecutionState;

pub struct FileSessionStore {
    root: PathBuf,
    locks: KeyedLocks,
    turns: KeyedLocks,
}

impl FileSessionStore {
    /// 创建存储目录（若不存在）
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, SessionError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: KeyedLocks::new(),
            turns: KeyedLocks::new(),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", session_id))
    }

    async fn read_record(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        match tokio::fs::read_to_string(self.path_for(session_id)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn tier(&self) -> SessionTier {
        SessionTier::LongTerm
    }

    fn turn_gate(&self) -> &KeyedLocks {
        &self.turns
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        check_id(session_id)?;
        self.read_record(session_id).await
    }

    async fn put(&self, session_id: &str, state: &ExecutionState) -> Result<SessionRecord, SessionError> {
        check_id(session_id)?;
        let _guard = self.locks.acquire(session_id).await;

        let previous = self.read_record(session_id).await.unwrap_or_else(|e| {
            tracing::warn!(session_id = %session_id, "Replacing unreadable checkpoint: {}", e);
            None
        });
        let record = SessionRecord::next(session_id, state, previous.as_ref());
        let body = serde_json::to_string_pretty(&record)?;

        let target = self.path_for(session_id);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", session_id, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(session_id = %session_id, path = %target.display(), "Session checkpoint written");
        Ok(record)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        check_id(session_id)?;
        let _guard = self.locks.acquire(session_id).await;
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
