//! 会话状态持久化
//!
//! 状态落盘在工作区内的 .coda/cache/session_state.json，进程重启后
//! 可从中恢复计划与对话历史。保存失败只记日志，不打断编排流程。

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::plan::SessionState;

/// 持久化信封：记录保存时间，便于排查陈旧状态
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    saved_at: String,
    state: SessionState,
}

/// 基于 JSON 文件的会话状态存储
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// 以工作区根目录构造存储，文件位于 <root>/.coda/cache/session_state.json
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        let path = workspace_root
            .as_ref()
            .join(".coda")
            .join("cache")
            .join("session_state.json");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存当前状态。目录不存在时自动创建；失败只记 warn。
    pub async fn save(&self, state: &SessionState) {
        if let Err(e) = self.try_save(state).await {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist session state");
        }
    }

    async fn try_save(&self, state: &SessionState) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Persistence(e.to_string()))?;
        }
        let envelope = Envelope {
            saved_at: Utc::now().to_rfc3339(),
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// 读取持久化状态。文件缺失或损坏返回 None（损坏时记 warn）。
    pub async fn load(&self) -> Option<SessionState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(_) => return None,
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Some(envelope.state),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt session state, ignoring");
                None
            }
        }
    }

    /// 删除持久化状态（取消任务时调用）。文件不存在视为成功。
    pub async fn clear(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clear session state");
            }
        }
    }
}
