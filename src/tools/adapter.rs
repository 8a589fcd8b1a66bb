//! 工作区适配器：文件系统 / 终端 / 编辑器桥接的注入点
//!
//! ToolExecutor 只依赖 WorkspaceAdapter trait，本地实现 LocalFsAdapter
//! 把所有路径锁定在工作区根目录内。桥接操作在纯本地环境不可用，
//! 返回统一的失败文案。

use std::path::PathBuf;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::core::AgentError;

/// 工具执行的宿主环境抽象
#[async_trait]
pub trait WorkspaceAdapter: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, AgentError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), AgentError>;
    async fn file_exists(&self, path: &str) -> bool;
    async fn list_directory(&self, path: &str, max_depth: usize) -> Result<String, AgentError>;
    async fn search_in_files(
        &self,
        pattern: &str,
        path: &str,
        is_regex: bool,
    ) -> Result<String, AgentError>;
    async fn run_terminal_command(&self, command: &str, cwd: &str) -> Result<String, AgentError>;
    /// 编辑器桥接调用（诊断 / 大纲 / 配置等）
    async fn call_bridge_tool(
        &self,
        name: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, AgentError>;
}

/// 搜索结果上限，防止结果爆炸
const SEARCH_MATCH_CAP: usize = 100;

/// 本地文件系统实现：所有路径相对工作区根目录解析，越界即拒绝
pub struct LocalFsAdapter {
    root: PathBuf,
}

impl LocalFsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 解析相对路径并做越界检查。目标不存在时校验其最近的已存在祖先。
    fn resolve(&self, rel: &str) -> Result<PathBuf, AgentError> {
        let joined = self.root.join(rel);
        let mut probe = joined.clone();
        let canonical_anchor = loop {
            match probe.canonicalize() {
                Ok(c) => break c,
                Err(_) => match probe.parent() {
                    Some(p) => probe = p.to_path_buf(),
                    None => {
                        return Err(AgentError::PathEscape(rel.to_string()));
                    }
                },
            }
        };
        let root = self
            .root
            .canonicalize()
            .map_err(|e| AgentError::ToolFailed(format!("workspace root unavailable: {}", e)))?;
        if !canonical_anchor.starts_with(&root) {
            return Err(AgentError::PathEscape(rel.to_string()));
        }
        Ok(joined)
    }

    fn is_hidden(entry: &walkdir::DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    }
}

#[async_trait]
impl WorkspaceAdapter for LocalFsAdapter {
    async fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| AgentError::ToolFailed(format!("cannot read {}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), AgentError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolFailed(format!("cannot create dirs: {}", e)))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| AgentError::ToolFailed(format!("cannot write {}: {}", path, e)))
    }

    async fn file_exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(&full).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn list_directory(&self, path: &str, max_depth: usize) -> Result<String, AgentError> {
        let full = self.resolve(path)?;
        let root = self.root.clone();
        let base = full.clone();
        let listing = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            for entry in WalkDir::new(&base)
                .min_depth(1)
                .max_depth(max_depth)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !LocalFsAdapter::is_hidden(e))
                .flatten()
            {
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();
                let marker = if entry.file_type().is_dir() { "/" } else { "" };
                lines.push(format!("{}{}", rel, marker));
            }
            lines.sort();
            lines.join("\n")
        })
        .await
        .map_err(|e| AgentError::ToolFailed(format!("listing task failed: {}", e)))?;

        if listing.is_empty() {
            Ok(format!("(empty directory: {})", path))
        } else {
            Ok(listing)
        }
    }

    async fn search_in_files(
        &self,
        pattern: &str,
        path: &str,
        is_regex: bool,
    ) -> Result<String, AgentError> {
        let full = self.resolve(path)?;
        let matcher = if is_regex {
            Some(
                regex::Regex::new(pattern)
                    .map_err(|e| AgentError::ToolFailed(format!("invalid regex: {}", e)))?,
            )
        } else {
            None
        };
        let needle = pattern.to_string();
        let root = self.root.clone();

        let report = tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            'files: for entry in WalkDir::new(&full)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !LocalFsAdapter::is_hidden(e))
                .flatten()
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();
                for (idx, line) in content.lines().enumerate() {
                    let matched = match &matcher {
                        Some(re) => re.is_match(line),
                        None => line.contains(&needle),
                    };
                    if matched {
                        hits.push(format!("{}:{}: {}", rel, idx + 1, line.trim()));
                        if hits.len() >= SEARCH_MATCH_CAP {
                            break 'files;
                        }
                    }
                }
            }
            hits
        })
        .await
        .map_err(|e| AgentError::ToolFailed(format!("search task failed: {}", e)))?;

        if report.is_empty() {
            Ok(format!("No matches for '{}'", pattern))
        } else {
            Ok(report.join("\n"))
        }
    }

    async fn run_terminal_command(&self, command: &str, cwd: &str) -> Result<String, AgentError> {
        let dir = self.resolve(cwd)?;
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&dir)
            .output()
            .await
            .map_err(|e| AgentError::ToolFailed(format!("cannot spawn command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = String::new();
        if !stdout.is_empty() {
            combined.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str("[stderr]\n");
            combined.push_str(&stderr);
        }
        if !output.status.success() {
            return Err(AgentError::ToolFailed(format!(
                "command exited with {}: {}",
                output.status,
                combined.trim()
            )));
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        Ok(combined)
    }

    async fn call_bridge_tool(
        &self,
        name: &str,
        _args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, AgentError> {
        Err(AgentError::ToolFailed(format!(
            "Bridge tool not available in this environment: {}",
            name
        )))
    }
}
