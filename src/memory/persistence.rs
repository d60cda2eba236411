//! 会话持久化
//!
//! 将会话消息写入/从 JSON 文件加载，用于跨进程恢复或事后排查（可选使用）。

use std::path::{Path, PathBuf};

use crate::memory::ConversationStore;

/// 单文件 JSON 持久化
#[derive(Debug)]
pub struct ConversationPersistence {
    path: PathBuf,
}

impl ConversationPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 从 JSON 文件加载；文件不存在时返回空存储
    pub fn load(&self) -> anyhow::Result<ConversationStore> {
        if !self.path.exists() {
            return Ok(ConversationStore::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(ConversationStore::from_json(&data)?)
    }

    /// 写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, store: &ConversationStore) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, store.to_json()?)?;
        Ok(())
    }
}
