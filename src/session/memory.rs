//! 短期会话存储：进程内 HashMap，支持按空闲时间淘汰（可由后台定时任务驱动）

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_id, KeyedLocks, SessionError, SessionRecord, SessionStore, SessionTier};
use crate::core::ExecutionState;

struct Entry {
    record: SessionRecord,
    last_active: Instant,
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    turns: KeyedLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 淘汰空闲超过 ttl 的会话，返回淘汰数
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_active.elapsed() < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// 启动后台淘汰任务：每 ttl/2（至少 1 秒）扫描一次；存储被释放后任务自行结束
    pub fn spawn_evictor(self: &Arc<Self>, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let period = (ttl / 2).max(Duration::from_secs(1));
        Self::spawn_evictor_every(Arc::downgrade(self), ttl, period)
    }

    fn spawn_evictor_every(store: Weak<Self>, ttl: Duration, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(store) = store.upgrade() else {
                    tracing::debug!("Session store dropped, evictor stopping");
                    break;
                };
                store.evict_idle(ttl).await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn tier(&self) -> SessionTier {
        SessionTier::ShortTerm
    }

    fn turn_gate(&self) -> &KeyedLocks {
        &self.turns
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        check_id(session_id)?;
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(session_id).map(|entry| {
            entry.last_active = Instant::now();
            entry.record.clone()
        }))
    }

    async fn put(&self, session_id: &str, state: &ExecutionState) -> Result<SessionRecord, SessionError> {
        check_id(session_id)?;
        let mut sessions = self.sessions.write().await;
        let record = SessionRecord::next(session_id, state, sessions.get(session_id).map(|e| &e.record));
        sessions.insert(
            session_id.to_string(),
            Entry {
                record: record.clone(),
                last_active: Instant::now(),
            },
        );
        Ok(record)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        check_id(session_id)?;
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}
