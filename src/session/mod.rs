//! 会话存储
//!
//! 把一次运行结束时的 ExecutionState 按会话 ID 保存为检查点，下一轮从检查点恢复。
//! 两个层级：短期（进程内 MemorySessionStore）、长期（FileSessionStore / SqliteSessionStore）。
//! 读取不存在的会话不是错误：返回 None，调用方以新状态开始。

pub mod file;
pub mod memory;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::config::SessionSection;
use crate::core::ExecutionState;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteSessionStore;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id: {0}")]
    InvalidId(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session checkpoint: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "async-sqlite")]
    #[error("Session database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// 存储层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionTier {
    /// 进程内，重启即失
    ShortTerm,
    /// 持久化，跨重启
    LongTerm,
}

/// 会话检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// 以已有记录（若有）的创建时间生成新记录
    pub fn next(session_id: &str, state: &ExecutionState, previous: Option<&SessionRecord>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            state: state.clone(),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

/// 会话存储 trait
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn tier(&self) -> SessionTier;

    /// 读取检查点；不存在返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// 读取状态；不存在返回新状态
    async fn get(&self, session_id: &str) -> Result<ExecutionState, SessionError> {
        Ok(self
            .load(session_id)
            .await?
            .map(|record| record.state)
            .unwrap_or_default())
    }

    /// 写入检查点（覆盖同 ID 的旧检查点）
    async fn put(&self, session_id: &str, state: &ExecutionState) -> Result<SessionRecord, SessionError>;

    /// 删除检查点；返回是否存在
    async fn remove(&self, session_id: &str) -> Result<bool, SessionError>;

    /// 轮次闸门：共享同一存储的所有执行器经由它保证同一会话同一时刻只有一个运行
    fn turn_gate(&self) -> &KeyedLocks;
}

/// 会话 ID 只允许字母、数字与 `_ . : -`，长度 1..=128
pub fn is_valid_session_id(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(id) && id != "." && id != "..")
}

pub(crate) fn check_id(id: &str) -> Result<(), SessionError> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}

/// 按键串行化：同一会话同一时刻只有一个持有者；最后一个持有者释放后条目被移除
#[derive(Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// 当前被持有或等待中的键数
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// KeyedLocks 的持有凭证
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // 只剩表内引用：没有持有者也没有等待者
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// 按配置创建会话存储；持久化后端初始化失败时退回内存存储，内存存储按 idle_ttl_secs 在后台淘汰空闲会话
pub async fn create_session_store(cfg: &SessionSection) -> Arc<dyn SessionStore> {
    match cfg.backend.as_str() {
        "file" => match FileSessionStore::new(&cfg.path).await {
            Ok(store) => {
                tracing::info!(path = %cfg.path, "Using file session store");
                return Arc::new(store);
            }
            Err(e) => tracing::warn!("File session store unavailable, falling back to memory: {}", e),
        },
        #[cfg(feature = "async-sqlite")]
        "sqlite" => match SqliteSessionStore::new(&cfg.path).await {
            Ok(store) => {
                tracing::info!(path = %cfg.path, "Using SQLite session store");
                return Arc::new(store);
            }
            Err(e) => tracing::warn!("SQLite session store unavailable, falling back to memory: {}", e),
        },
        "memory" => {}
        other => tracing::warn!(backend = %other, "Unknown session backend, using memory"),
    }
    let store = Arc::new(MemorySessionStore::new());
    // idle_ttl_secs = 0 关闭淘汰
    if cfg.idle_ttl_secs > 0 {
        store.spawn_evictor(std::time::Duration::from_secs(cfg.idle_ttl_secs));
    }
    store
}
