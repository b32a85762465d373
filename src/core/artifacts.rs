//! 运行产物：每次运行两份文档
//!
//! - `{run_id}_steps.md`：只追加的步骤日志，按顺序记录每个节点的输出
//! - `{run_id}_report.md`：最终报告，每轮迭代在顶部插入新的一级章节
//!
//! 写入失败只记录日志，不影响运行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

/// 产物存储（外部协作方，纯文本文档）
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn append(&self, key: &str, text: &str) -> Result<(), ArtifactError>;

    async fn prepend(&self, key: &str, text: &str) -> Result<(), ArtifactError>;

    async fn read(&self, key: &str) -> Result<Option<String>, ArtifactError>;
}

/// 内存产物存储
#[derive(Default)]
pub struct MemoryArtifactStore {
    docs: RwLock<HashMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn append(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        self.docs
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn prepend(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        let mut docs = self.docs.write().await;
        let doc = docs.entry(key.to_string()).or_default();
        doc.insert_str(0, text);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, ArtifactError> {
        Ok(self.docs.read().await.get(key).cloned())
    }
}

/// 目录下的文件产物存储；同一进程内的写操作串行化
pub struct FileArtifactStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        let valid = !key.is_empty()
            && !key.contains("..")
            && !key.starts_with('/')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
        if !valid {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn read_existing(path: &Path) -> Result<String, ArtifactError> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(path: &Path, content: &str) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn append(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn prepend(&self, key: &str, text: &str) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        let doc = Self::read_existing(&path).await?;
        Self::write(&path, &format!("{}{}", text, doc)).await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, ArtifactError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 某次运行的两份产物文档
#[derive(Clone)]
pub struct RunArtifacts {
    store: Arc<dyn ArtifactStore>,
    steps_key: String,
    report_key: String,
}

impl RunArtifacts {
    pub fn new(store: Arc<dyn ArtifactStore>, run_id: &str) -> Self {
        Self {
            store,
            steps_key: format!("artifacts/{}_steps.md", run_id),
            report_key: format!("artifacts/{}_report.md", run_id),
        }
    }

    pub fn in_memory(run_id: &str) -> Self {
        Self::new(Arc::new(MemoryArtifactStore::new()), run_id)
    }

    pub fn steps_key(&self) -> &str {
        &self.steps_key
    }

    pub fn report_key(&self) -> &str {
        &self.report_key
    }

    fn timestamp() -> String {
        format!("# {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }

    /// 追加一条步骤记录（带时间戳标题）
    pub async fn log_step(&self, node: &str, body: &str) {
        let entry = format!("{}## {}\n\n{}\n", Self::timestamp(), node, body);
        if let Err(e) = self.store.append(&self.steps_key, &entry).await {
            tracing::warn!(key = %self.steps_key, "Failed to append steps log: {}", e);
        }
    }

    /// 在报告顶部插入新章节
    pub async fn prepend_report(&self, section: &str) {
        let entry = format!("{}{}", Self::timestamp(), section);
        if let Err(e) = self.store.prepend(&self.report_key, &entry).await {
            tracing::warn!(key = %self.report_key, "Failed to prepend report: {}", e);
        }
    }

    pub async fn steps(&self) -> Option<String> {
        self.store.read(&self.steps_key).await.ok().flatten()
    }

    pub async fn report(&self) -> Option<String> {
        self.store.read(&self.report_key).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_sections_are_prepended() {
        let artifacts = RunArtifacts::in_memory("r1");
        artifacts.prepend_report("first\n").await;
        artifacts.prepend_report("second\n").await;

        let report = artifacts.report().await.unwrap();
        assert!(report.find("second").unwrap() < report.find("first").unwrap());
    }

    #[tokio::test]
    async fn test_steps_log_is_append_only() {
        let artifacts = RunArtifacts::in_memory("r1");
        artifacts.log_step("a", "x").await;
        artifacts.log_step("b", "y").await;

        let steps = artifacts.steps().await.unwrap();
        assert!(steps.find("## a").unwrap() < steps.find("## b").unwrap());
    }

    #[tokio::test]
    async fn test_file_append_only_adds_to_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        for i in 0..50 {
            store.append("artifacts/long_steps.md", &format!("{}\n", i)).await.unwrap();
        }

        let doc = store.read("artifacts/long_steps.md").await.unwrap().unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "0");
        assert_eq!(lines[49], "49");
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_key_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        store.append("artifacts/x_steps.md", "one").await.unwrap();
        store.append("artifacts/x_steps.md", "two").await.unwrap();
        store.prepend("artifacts/x_steps.md", "zero").await.unwrap();

        let doc = store.read("artifacts/x_steps.md").await.unwrap();
        assert_eq!(doc.as_deref(), Some("zeroonetwo"));
        assert!(store.read("../escape").await.is_err());
        assert_eq!(store.read("artifacts/missing.md").await.unwrap(), None);
    }
}
