//! 工具执行器
//!
//! execute(call) 负责补发 call_id、规范化参数、按类别施加超时，并把所有
//! 失败（未知工具 / 执行失败 / 超时）折叠为 success=false 的 ToolResult，
//! 使批量调用的结果数量恒等于请求数量；每次调用输出 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::timeout;
use uuid::Uuid;

use crate::core::AgentError;
use crate::observability::DebugSink;
use crate::protocol::{ToolCall, ToolManifest, ToolResult};
use crate::tools::adapter::WorkspaceAdapter;
use crate::tools::registry::{self, TimeoutClass, ToolEntry, ToolOp, BUILTIN_TOOLS};

/// 工具执行的旁路观察者。回调异常不存在：钩子不返回错误。
#[async_trait]
pub trait ToolObserver: Send + Sync {
    async fn on_start(&self, call: &ToolCall);
    async fn on_end(&self, result: &ToolResult);
}

/// 工具执行器：持有工作区适配器与两档超时
pub struct ToolExecutor {
    adapter: Arc<dyn WorkspaceAdapter>,
    debug: Arc<dyn DebugSink>,
    generic_timeout: Duration,
    bridge_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        adapter: Arc<dyn WorkspaceAdapter>,
        debug: Arc<dyn DebugSink>,
        generic_timeout_secs: u64,
        bridge_timeout_secs: u64,
    ) -> Self {
        Self {
            adapter,
            debug,
            generic_timeout: Duration::from_secs(generic_timeout_secs),
            bridge_timeout: Duration::from_secs(bridge_timeout_secs),
        }
    }

    /// 全部内置工具的清单（签名 + 描述），供系统提示词使用
    pub fn manifest(&self) -> Vec<ToolManifest> {
        BUILTIN_TOOLS
            .iter()
            .map(|t| ToolManifest {
                name: t.name.to_string(),
                signature: t.signature.to_string(),
                description: t.description.to_string(),
            })
            .collect()
    }

    /// 执行单次调用。任何失败都折叠进 ToolResult，不向上冒泡。
    pub async fn execute(&self, mut call: ToolCall) -> ToolResult {
        if call.call_id.is_none() {
            call.call_id = Some(Uuid::new_v4().to_string());
        }
        let start = Instant::now();

        let Some(entry) = registry::lookup(&call.name) else {
            return self.finish(
                &call,
                start,
                false,
                "unknown",
                format!("Unknown tool: {}", call.name),
            );
        };

        let args = registry::normalize_args(entry, call.args.clone());
        let limit = match entry.timeout {
            TimeoutClass::Generic => self.generic_timeout,
            TimeoutClass::Bridge => self.bridge_timeout,
        };

        let outcome = timeout(limit, self.invoke(entry, &args)).await;
        match outcome {
            Ok(Ok(text)) => self.finish(&call, start, true, "ok", text),
            Ok(Err(e)) => self.finish(&call, start, false, "error", format!("Error: {}", e)),
            Err(_) => self.finish(
                &call,
                start,
                false,
                "timeout",
                format!("Tool timed out after {}s", limit.as_secs()),
            ),
        }
    }

    fn finish(
        &self,
        call: &ToolCall,
        start: Instant,
        success: bool,
        outcome: &str,
        result: String,
    ) -> ToolResult {
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.call_id,
            "ok": success,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolResult {
            name: call.name.clone(),
            call_id: call.call_id.clone(),
            success,
            result,
            duration_ms: Some(duration_ms),
        }
    }

    async fn invoke(
        &self,
        entry: &ToolEntry,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, AgentError> {
        match entry.op {
            ToolOp::ReadFile => {
                let path = require_str(args, "path")?;
                let content = self.adapter.read_file(path).await?;
                Ok(slice_lines(
                    &content,
                    opt_usize(args, "start_line"),
                    opt_usize(args, "end_line"),
                ))
            }
            ToolOp::WriteFile => {
                let path = require_str(args, "path")?;
                let content = opt_str(args, "content").unwrap_or("");
                self.adapter.write_file(path, content).await?;
                Ok(format!("File written: {}", path))
            }
            ToolOp::CreateFile => {
                let path = require_str(args, "path")?;
                if self.adapter.file_exists(path).await {
                    return Err(AgentError::ToolFailed(format!(
                        "File already exists: {}",
                        path
                    )));
                }
                let content = opt_str(args, "content").unwrap_or("");
                self.adapter.write_file(path, content).await?;
                Ok(format!("File created: {}", path))
            }
            ToolOp::EditFile => {
                let path = require_str(args, "path")?;
                let old_string = require_str(args, "old_string")?;
                let new_string = require_str(args, "new_string")?;
                let content = self.adapter.read_file(path).await?;
                let count = content.matches(old_string).count();
                match count {
                    0 => Err(AgentError::ToolFailed(format!(
                        "Text not found in file: {}",
                        path
                    ))),
                    1 => {
                        let updated = content.replacen(old_string, new_string, 1);
                        self.adapter.write_file(path, &updated).await?;
                        Ok(format!("File edited: {}", path))
                    }
                    n => Err(AgentError::ToolFailed(format!(
                        "Found {} matches. Include more context to make the replacement unique.",
                        n
                    ))),
                }
            }
            ToolOp::ListDirectory => {
                let path = opt_str(args, "path").unwrap_or("");
                let depth = opt_usize(args, "max_depth").unwrap_or(1).max(1);
                self.adapter.list_directory(path, depth).await
            }
            ToolOp::SearchInFiles => {
                let pattern = require_str(args, "pattern")?;
                let path = opt_str(args, "path").unwrap_or("");
                let is_regex = args
                    .get("is_regex")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.adapter.search_in_files(pattern, path, is_regex).await
            }
            ToolOp::RunTerminalCommand => {
                let command = require_str(args, "command")?;
                let cwd = opt_str(args, "cwd").unwrap_or("");
                self.adapter.run_terminal_command(command, cwd).await
            }
            ToolOp::LogThought => {
                let thought = require_str(args, "thought")?;
                self.debug
                    .debug("thought", serde_json::json!({ "thought": thought }));
                Ok("Thought logged".to_string())
            }
            ToolOp::Bridge => self.adapter.call_bridge_tool(entry.name, args).await,
        }
    }

    /// 顺序执行，保持请求顺序
    pub async fn execute_sequential(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }

    /// 并发执行，结果按请求顺序返回
    pub async fn execute_parallel(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        join_all(calls.into_iter().map(|c| self.execute(c))).await
    }

    /// 并发执行并在每次调用前后触发观察者钩子
    pub async fn execute_parallel_with_hooks(
        &self,
        calls: Vec<ToolCall>,
        observer: Option<&dyn ToolObserver>,
    ) -> Vec<ToolResult> {
        join_all(calls.into_iter().map(|call| async move {
            if let Some(obs) = observer {
                obs.on_start(&call).await;
            }
            let result = self.execute(call).await;
            if let Some(obs) = observer {
                obs.on_end(&result).await;
            }
            result
        }))
        .await
    }
}

fn args_preview(args: &serde_json::Map<String, serde_json::Value>) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

fn require_str<'a>(
    args: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str, AgentError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::ToolFailed(format!("missing required argument: {}", key)))
}

fn opt_str<'a>(
    args: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn opt_usize(args: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

/// 按 1 起始的行区间截取内容；区间缺省时原样返回
fn slice_lines(content: &str, start: Option<usize>, end: Option<usize>) -> String {
    if start.is_none() && end.is_none() {
        return content.to_string();
    }
    let lines: Vec<&str> = content.lines().collect();
    let from = start.unwrap_or(1).saturating_sub(1).min(lines.len());
    let to = end.unwrap_or(lines.len()).min(lines.len());
    if from >= to {
        return String::new();
    }
    lines[from..to].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopDebugSink;
    use crate::tools::adapter::LocalFsAdapter;
    use serde_json::json;
    use std::sync::Mutex;

    fn executor_in(dir: &std::path::Path) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(LocalFsAdapter::new(dir)),
            Arc::new(NoopDebugSink),
            30,
            15,
        )
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(name, args)
    }

    #[tokio::test]
    async fn create_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());

        let created = exec
            .execute(call("create_file", json!({"path": "a.txt", "content": "line1\nline2\nline3"})))
            .await;
        assert!(created.success);
        assert!(created.call_id.is_some());

        let read = exec
            .execute(call("read_file", json!({"file_path": "a.txt", "start_line": 2, "end_line": 2})))
            .await;
        assert!(read.success);
        assert_eq!(read.result, "line2");
    }

    #[tokio::test]
    async fn create_existing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        exec.execute(call("create_file", json!({"path": "a.txt"})))
            .await;
        let second = exec
            .execute(call("create_file", json!({"path": "a.txt"})))
            .await;
        assert!(!second.success);
        assert!(second.result.contains("File already exists"));
    }

    #[tokio::test]
    async fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        exec.execute(call(
            "write_file",
            json!({"path": "a.txt", "content": "let x = 1;\nlet x = 1;\n"}),
        ))
        .await;

        let ambiguous = exec
            .execute(call(
                "edit_file",
                json!({"path": "a.txt", "old_string": "let x = 1;", "new_string": "let y = 2;"}),
            ))
            .await;
        assert!(!ambiguous.success);
        assert!(ambiguous.result.contains("Found 2 matches"));

        // 文件未被修改
        let read = exec.execute(call("read_file", json!({"path": "a.txt"}))).await;
        assert_eq!(read.result, "let x = 1;\nlet x = 1;\n");

        let missing = exec
            .execute(call(
                "edit_file",
                json!({"path": "a.txt", "old_string": "nope", "new_string": "y"}),
            ))
            .await;
        assert!(!missing.success);
        assert!(missing.result.contains("Text not found"));

        let unique = exec
            .execute(call(
                "edit_file",
                json!({"path": "a.txt", "old_string": "let x = 1;\nlet x = 1;", "new_string": "let z = 3;"}),
            ))
            .await;
        assert!(unique.success);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        let result = exec.execute(call("teleport", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.result, "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn bridge_tool_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        let result = exec
            .execute(call("get_workspace_diagnostics", json!({})))
            .await;
        assert!(!result.success);
        assert!(result.result.contains("Bridge tool not available"));
    }

    struct SlowAdapter;

    #[async_trait]
    impl WorkspaceAdapter for SlowAdapter {
        async fn read_file(&self, _path: &str) -> Result<String, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
        async fn write_file(&self, _path: &str, _content: &str) -> Result<(), AgentError> {
            Ok(())
        }
        async fn file_exists(&self, _path: &str) -> bool {
            false
        }
        async fn list_directory(&self, _path: &str, _max_depth: usize) -> Result<String, AgentError> {
            Ok(String::new())
        }
        async fn search_in_files(
            &self,
            _pattern: &str,
            _path: &str,
            _is_regex: bool,
        ) -> Result<String, AgentError> {
            Ok(String::new())
        }
        async fn run_terminal_command(&self, _command: &str, _cwd: &str) -> Result<String, AgentError> {
            Ok(String::new())
        }
        async fn call_bridge_tool(
            &self,
            _name: &str,
            _args: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let exec = ToolExecutor::new(Arc::new(SlowAdapter), Arc::new(NoopDebugSink), 1, 1);
        let result = exec
            .execute(call("read_file", json!({"path": "a.txt"})))
            .await;
        assert!(!result.success);
        assert!(result.result.contains("Tool timed out after 1s"));
    }

    #[tokio::test]
    async fn parallel_preserves_order_and_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        exec.execute(call("write_file", json!({"path": "ok.txt", "content": "hi"})))
            .await;

        let results = exec
            .execute_parallel(vec![
                call("read_file", json!({"path": "ok.txt"})),
                call("read_file", json!({"path": "missing.txt"})),
                call("teleport", json!({})),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[2].result, "Unknown tool: teleport");
    }

    struct RecordingObserver {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolObserver for RecordingObserver {
        async fn on_start(&self, call: &ToolCall) {
            self.log.lock().unwrap().push(format!("start:{}", call.name));
        }
        async fn on_end(&self, result: &ToolResult) {
            self.log
                .lock()
                .unwrap()
                .push(format!("end:{}:{}", result.name, result.success));
        }
    }

    #[tokio::test]
    async fn hooks_fire_around_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        let observer = RecordingObserver {
            log: Mutex::new(Vec::new()),
        };

        let results = exec
            .execute_parallel_with_hooks(
                vec![call("write_file", json!({"path": "h.txt", "content": "x"}))],
                Some(&observer),
            )
            .await;

        assert_eq!(results.len(), 1);
        let log = observer.log.lock().unwrap();
        assert_eq!(log.as_slice(), ["start:write_file", "end:write_file:true"]);
    }

    #[tokio::test]
    async fn sequential_matches_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor_in(dir.path());
        let results = exec
            .execute_sequential(vec![
                call("write_file", json!({"path": "s.txt", "content": "v1"})),
                call("read_file", json!({"path": "s.txt"})),
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].result, "v1");
    }
}
