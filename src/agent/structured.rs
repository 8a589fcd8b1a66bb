//! 结构化执行代理
//!
//! 围绕结构化工具调用协议的执行循环：喂任务给 LLM，解析 JSON 响应，
//! tool_request 就并发执行工具并把结果回喂，final_response / clarification
//! 结束循环。循环受最大迭代次数约束，在每个挂起点（LLM 调用、工具批次）
//! 响应取消令牌。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::events::{emit, AgentEvent, EventSender};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::observability::DebugSink;
use crate::protocol::{self, ResponseKind, ToolCall, ToolResult};
use crate::tools::{ToolExecutor, ToolObserver};

/// 一次任务执行的环境
pub struct TaskContext<'a> {
    pub history: &'a [Message],
    pub context: Option<&'a str>,
    pub interaction_id: &'a str,
    pub step_id: &'a str,
    pub cancel: CancellationToken,
    pub events: Option<&'a EventSender>,
}

/// 执行结局。Cancelled 携带已产出的部分内容。
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(String),
    Cancelled { partial: String },
}

/// 工具事件转发：把执行器钩子翻译为 ToolStart / ToolEnd 事件
struct EventObserver<'a> {
    events: Option<&'a EventSender>,
}

#[async_trait]
impl ToolObserver for EventObserver<'_> {
    async fn on_start(&self, call: &ToolCall) {
        emit(self.events, AgentEvent::ToolStart { call: call.clone() });
    }

    async fn on_end(&self, result: &ToolResult) {
        emit(
            self.events,
            AgentEvent::ToolEnd {
                result: result.clone(),
            },
        );
    }
}

/// 结构化代理
pub struct StructuredAgent {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    debug: Arc<dyn DebugSink>,
    system_prompt: String,
    max_iterations: usize,
}

impl StructuredAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        debug: Arc<dyn DebugSink>,
        max_iterations: usize,
    ) -> Self {
        let system_prompt = protocol::structured_system_prompt(&executor.manifest());
        Self {
            llm,
            executor,
            debug,
            system_prompt,
            max_iterations,
        }
    }

    fn initial_user_message(&self, task: &str, context: Option<&str>) -> Message {
        let tool_names: Vec<&str> = crate::tools::BUILTIN_TOOLS.iter().map(|t| t.name).collect();
        let mut content = format!(
            "[SYSTEM: ENVIRONMENT READY. Tools available: {}]\n\n{}",
            tool_names.join(", "),
            task
        );
        if let Some(ctx) = context {
            if !ctx.is_empty() {
                content.push_str("\n\n---\n## CONTEXT\n");
                content.push_str(ctx);
            }
        }
        Message::user(content)
    }

    fn append_output(output: &mut String, text: &str) {
        if text.is_empty() {
            return;
        }
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(text);
    }

    /// 执行任务直到终态响应、迭代上限或取消
    pub async fn run(&self, task: &str, ctx: &TaskContext<'_>) -> Result<AgentOutcome, AgentError> {
        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend_from_slice(ctx.history);
        messages.push(self.initial_user_message(task, ctx.context));

        let mut output = String::new();

        for iteration in 1..=self.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Ok(AgentOutcome::Cancelled { partial: output });
            }

            // biased：结果已就绪时优先取结果，取消在下一个边界生效
            let raw = tokio::select! {
                biased;
                res = self.llm.complete(&messages) => {
                    res.map_err(AgentError::Llm)?
                }
                _ = ctx.cancel.cancelled() => {
                    return Ok(AgentOutcome::Cancelled { partial: output });
                }
            };

            let parsed = match protocol::parse_structured(&raw) {
                Ok(p) => p,
                Err(e) => {
                    let preview: String = raw.chars().take(500).collect();
                    Self::append_output(
                        &mut output,
                        &format!("Error parsing response: {}\n\nRaw: {}", e, preview),
                    );
                    return Ok(AgentOutcome::Completed(output));
                }
            };

            if !parsed.reasoning.is_empty() {
                self.debug.debug(
                    "reasoning",
                    serde_json::json!({
                        "interaction_id": ctx.interaction_id,
                        "step_id": ctx.step_id,
                        "iteration": iteration,
                        "reasoning": parsed.reasoning,
                    }),
                );
            }

            match parsed.response_type {
                ResponseKind::FinalResponse | ResponseKind::Clarification => {
                    Self::append_output(&mut output, &parsed.response);
                    return Ok(AgentOutcome::Completed(output));
                }
                ResponseKind::ToolRequest => {
                    if parsed.tools.is_empty() {
                        Self::append_output(
                            &mut output,
                            "Agent requested tools but didn't specify which ones.",
                        );
                        return Ok(AgentOutcome::Completed(output));
                    }

                    // 简短的过程性说明回显给用户，长篇内容等终态再输出
                    if !parsed.response.is_empty() && parsed.response.chars().count() < 200 {
                        Self::append_output(&mut output, &parsed.response);
                    }

                    self.debug.debug(
                        "tool_requests",
                        serde_json::json!({
                            "interaction_id": ctx.interaction_id,
                            "step_id": ctx.step_id,
                            "iteration": iteration,
                            "tools": parsed.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                        }),
                    );

                    let observer = EventObserver { events: ctx.events };
                    let results = tokio::select! {
                        biased;
                        res = self
                            .executor
                            .execute_parallel_with_hooks(parsed.tools.clone(), Some(&observer)) => res,
                        _ = ctx.cancel.cancelled() => {
                            return Ok(AgentOutcome::Cancelled { partial: output });
                        }
                    };

                    self.debug.debug(
                        "tool_results",
                        serde_json::json!({
                            "interaction_id": ctx.interaction_id,
                            "step_id": ctx.step_id,
                            "iteration": iteration,
                            "results": results
                                .iter()
                                .map(|r| serde_json::json!({ "name": r.name, "ok": r.success }))
                                .collect::<Vec<_>>(),
                        }),
                    );

                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(protocol::format_tool_results(&results)));
                }
            }
        }

        Self::append_output(
            &mut output,
            "\n⚠️ Maximum tool iterations reached. Task may be incomplete.",
        );
        Ok(AgentOutcome::Completed(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::observability::NoopDebugSink;
    use crate::tools::LocalFsAdapter;

    fn executor_in(dir: &std::path::Path) -> Arc<ToolExecutor> {
        Arc::new(ToolExecutor::new(
            Arc::new(LocalFsAdapter::new(dir)),
            Arc::new(NoopDebugSink),
            30,
            15,
        ))
    }

    fn ctx(cancel: CancellationToken) -> TaskContext<'static> {
        TaskContext {
            history: &[],
            context: None,
            interaction_id: "itx",
            step_id: "step_1",
            cancel,
            events: None,
        }
    }

    fn agent_with(llm: Arc<ScriptedLlm>, dir: &std::path::Path) -> StructuredAgent {
        StructuredAgent::new(llm, executor_in(dir), Arc::new(NoopDebugSink), 10)
    }

    fn final_response(text: &str) -> String {
        serde_json::json!({
            "response_type": "final_response",
            "reasoning": "done",
            "tools": [],
            "response": text,
        })
        .to_string()
    }

    #[tokio::test]
    async fn final_response_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![final_response("all set")]));
        let agent = agent_with(llm.clone(), dir.path());

        let outcome = agent.run("say hi", &ctx(CancellationToken::new())).await.unwrap();
        assert_eq!(outcome, AgentOutcome::Completed("all set".to_string()));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn empty_tool_request_yields_explanatory_output() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![serde_json::json!({
            "response_type": "tool_request",
            "tools": [],
            "response": "",
        })
        .to_string()]));
        let agent = agent_with(llm.clone(), dir.path());

        let outcome = agent.run("do it", &ctx(CancellationToken::new())).await.unwrap();
        match outcome {
            AgentOutcome::Completed(text) => {
                assert!(text.contains("requested tools but didn't specify"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn tool_round_then_final() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![
            serde_json::json!({
                "response_type": "tool_request",
                "reasoning": "need to create the file",
                "tools": [{"name": "write_file", "args": {"path": "out.txt", "content": "hello"}}],
                "response": "Writing the file",
            })
            .to_string(),
            final_response("File is ready"),
        ]));
        let agent = agent_with(llm.clone(), dir.path());

        let outcome = agent.run("write hello", &ctx(CancellationToken::new())).await.unwrap();
        match outcome {
            AgentOutcome::Completed(text) => {
                assert!(text.contains("Writing the file"));
                assert!(text.contains("File is ready"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.calls(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello");
    }

    /// 记录 debug 负载的测试 sink
    struct RecordingSink {
        records: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl crate::observability::DebugSink for RecordingSink {
        fn debug(&self, category: &str, payload: serde_json::Value) {
            self.records
                .lock()
                .unwrap()
                .push((category.to_string(), payload));
        }
    }

    #[tokio::test]
    async fn debug_records_are_keyed_by_interaction_and_step() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![
            serde_json::json!({
                "response_type": "tool_request",
                "reasoning": "log progress",
                "tools": [{"name": "log_thought", "args": {"thought": "working"}}],
                "response": "",
            })
            .to_string(),
            final_response("done"),
        ]));
        let sink = Arc::new(RecordingSink {
            records: std::sync::Mutex::new(Vec::new()),
        });
        let agent = StructuredAgent::new(llm, executor_in(dir.path()), sink.clone(), 10);

        agent.run("log it", &ctx(CancellationToken::new())).await.unwrap();

        let records = sink.records.lock().unwrap();
        for category in ["reasoning", "tool_requests", "tool_results"] {
            let (_, payload) = records
                .iter()
                .find(|(c, _)| c == category)
                .unwrap_or_else(|| panic!("missing {} record", category));
            assert_eq!(payload["interaction_id"], "itx");
            assert_eq!(payload["step_id"], "step_1");
        }
    }

    #[tokio::test]
    async fn iteration_budget_is_exactly_max() {
        let dir = tempfile::tempdir().unwrap();
        let tool_request = serde_json::json!({
            "response_type": "tool_request",
            "tools": [{"name": "log_thought", "args": {"thought": "still thinking"}}],
            "response": "",
        })
        .to_string();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![tool_request; 12]));
        let agent = agent_with(llm.clone(), dir.path());

        let outcome = agent.run("loop forever", &ctx(CancellationToken::new())).await.unwrap();
        match outcome {
            AgentOutcome::Completed(text) => {
                assert!(text.contains("Maximum tool iterations reached"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.calls(), 10);
    }

    #[tokio::test]
    async fn unparsable_output_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec!["total gibberish".to_string()]));
        let agent = agent_with(llm.clone(), dir.path());

        let outcome = agent.run("task", &ctx(CancellationToken::new())).await.unwrap();
        match outcome {
            AgentOutcome::Completed(text) => {
                assert!(text.contains("Error parsing response"));
                assert!(text.contains("total gibberish"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn llm_transport_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![Err("connection refused".to_string())]));
        let agent = agent_with(llm, dir.path());

        let err = agent.run("task", &ctx(CancellationToken::new())).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::with_replies(vec![final_response("unused")]));
        let agent = agent_with(llm.clone(), dir.path());

        let token = CancellationToken::new();
        token.cancel();
        let outcome = agent.run("task", &ctx(token)).await.unwrap();
        assert_eq!(outcome, AgentOutcome::Cancelled { partial: String::new() });
        assert_eq!(llm.calls(), 0);
    }
}
