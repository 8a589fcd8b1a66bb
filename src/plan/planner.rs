//! 计划协作者：调用 LLM 生成 / 扩展 / 修改执行计划
//!
//! 规划从不让会话失败：LLM 出错或输出不可解析时退回保守结果
//! （创建时给单步兜底计划，扩展 / 修改时保留原计划）。修改路径校验
//! 模型没有篡改已完成步骤，发现篡改时以原已完成步骤拼接修复。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::observability::DebugSink;
use crate::plan::{AgentMode, ExecutionPlan, StepStatus, TaskStep};
use crate::protocol;

/// 规划接口。实现必须返回可用计划，兜底逻辑内置。
#[async_trait]
pub trait Planning: Send + Sync {
    /// 根据用户请求与意图精炼目标生成新计划
    async fn create_plan(&self, user_input: &str, refined_goal: &str) -> ExecutionPlan;
    /// 在现有计划之后追加步骤
    async fn extend_plan(&self, plan: &ExecutionPlan, instruction: &str) -> ExecutionPlan;
    /// 按用户反馈修改未完成部分
    async fn modify_plan(&self, plan: &ExecutionPlan, instruction: &str) -> ExecutionPlan;
}

/// LLM 返回的计划 JSON
#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    refined_goal: String,
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default)]
    requires_approval: bool,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: Option<StepStatus>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    mode: Option<AgentMode>,
}

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a planning assistant. Decompose the user's goal into a short sequence of concrete, independently executable steps. Respond with a single JSON object only:

{
  "refined_goal": "one-sentence restatement of the goal",
  "steps": [
    {"title": "short title", "description": "what to do and what output is expected", "mode": "deep" | "fast_tool" | "chat"}
  ],
  "requires_approval": false
}

Keep plans small (2-6 steps). Prefer "deep" mode for multi-tool work, "fast_tool" for a single obvious tool call, "chat" for pure text output. Never include steps for asking the user questions."#;

/// 基于 LLM 的规划器
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    debug: Arc<dyn DebugSink>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, debug: Arc<dyn DebugSink>) -> Self {
        Self { llm, debug }
    }

    async fn complete_plan(&self, prompt: String) -> Option<RawPlan> {
        let messages = vec![
            Message::system(PLANNER_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let raw = match self.llm.complete(&messages).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "planner llm call failed");
                return None;
            }
        };
        let block = protocol::extract_json_block(&raw)?;
        match serde_json::from_str::<RawPlan>(&block) {
            Ok(plan) => Some(plan),
            Err(e) => {
                tracing::warn!(error = %e, "planner output unparsable");
                None
            }
        }
    }

    /// 把 LLM 输出的步骤转为 TaskStep，id 缺省按位置补发
    fn materialize(raw: RawPlan, original_request: &str, fallback_goal: &str) -> ExecutionPlan {
        let steps = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| TaskStep {
                id: s.id.unwrap_or_else(|| format!("step_{}", i + 1)),
                title: s.title,
                description: s.description,
                status: s.status.unwrap_or(StepStatus::Pending),
                result: s.result,
                mode: s.mode.unwrap_or(AgentMode::Deep),
            })
            .collect();
        ExecutionPlan {
            original_request: original_request.to_string(),
            refined_goal: if raw.refined_goal.is_empty() {
                fallback_goal.to_string()
            } else {
                raw.refined_goal
            },
            steps,
            requires_approval: raw.requires_approval,
        }
    }

    /// 单步兜底计划：直接执行原始请求
    fn fallback_plan(user_input: &str, refined_goal: &str) -> ExecutionPlan {
        ExecutionPlan {
            original_request: user_input.to_string(),
            refined_goal: refined_goal.to_string(),
            steps: vec![TaskStep {
                id: "step_1".to_string(),
                title: "Execute Request".to_string(),
                description: format!("Direct execution: {}", user_input),
                status: StepStatus::Pending,
                result: None,
                mode: AgentMode::Deep,
            }],
            requires_approval: false,
        }
    }

    fn plan_as_json(plan: &ExecutionPlan) -> String {
        serde_json::to_string_pretty(plan).unwrap_or_default()
    }
}

#[async_trait]
impl Planning for Planner {
    async fn create_plan(&self, user_input: &str, refined_goal: &str) -> ExecutionPlan {
        let prompt = format!(
            "User request: {}\nRefined goal: {}\n\nCreate the plan.",
            user_input, refined_goal
        );
        let plan = match self.complete_plan(prompt).await {
            Some(raw) if !raw.steps.is_empty() => {
                Self::materialize(raw, user_input, refined_goal)
            }
            _ => Self::fallback_plan(user_input, refined_goal),
        };
        self.debug.debug(
            "plan_created",
            serde_json::json!({ "steps": plan.steps.len(), "goal": plan.refined_goal }),
        );
        plan
    }

    async fn extend_plan(&self, plan: &ExecutionPlan, instruction: &str) -> ExecutionPlan {
        let prompt = format!(
            "Current plan:\n{}\n\nExtend this plan per the instruction below. Return the FULL plan \
             (all existing steps unchanged, new steps appended).\nInstruction: {}",
            Self::plan_as_json(plan),
            instruction
        );
        match self.complete_plan(prompt).await {
            Some(raw) => {
                let extended = Self::materialize(raw, &plan.original_request, &plan.refined_goal);
                // 模型丢步骤时放弃扩展结果
                if extended.steps.len() < plan.steps.len() {
                    tracing::warn!(
                        before = plan.steps.len(),
                        after = extended.steps.len(),
                        "extend dropped steps, keeping original plan"
                    );
                    plan.clone()
                } else {
                    extended
                }
            }
            None => plan.clone(),
        }
    }

    async fn modify_plan(&self, plan: &ExecutionPlan, instruction: &str) -> ExecutionPlan {
        let prompt = format!(
            "Current plan:\n{}\n\nModify the NOT-yet-done steps per the instruction below. Steps with \
             status \"done\" must be returned unchanged. Return the FULL plan.\nInstruction: {}",
            Self::plan_as_json(plan),
            instruction
        );
        match self.complete_plan(prompt).await {
            Some(raw) => {
                let modified = Self::materialize(raw, &plan.original_request, &plan.refined_goal);
                repair_done_steps(plan, modified)
            }
            None => plan.clone(),
        }
    }
}

/// 已完成步骤是事实记录，模型不得改写。
/// 返回的计划中 DONE 步骤数量与原计划不一致时，以原 DONE 步骤 + 返回的
/// 未完成步骤重新拼接。
fn repair_done_steps(original: &ExecutionPlan, mut modified: ExecutionPlan) -> ExecutionPlan {
    let original_done: Vec<&TaskStep> = original.done_steps().collect();
    let modified_done = modified.done_steps().count();
    if modified_done == original_done.len() {
        return modified;
    }
    tracing::warn!(
        expected = original_done.len(),
        got = modified_done,
        "modified plan altered done steps, splicing originals back"
    );
    let mut steps: Vec<TaskStep> = original_done.into_iter().cloned().collect();
    steps.extend(
        modified
            .steps
            .drain(..)
            .filter(|s| s.status != StepStatus::Done),
    );
    ExecutionPlan {
        original_request: original.original_request.clone(),
        refined_goal: modified.refined_goal,
        steps,
        requires_approval: modified.requires_approval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::observability::NoopDebugSink;

    fn planner_with(replies: Vec<Result<String, String>>) -> Planner {
        Planner::new(Arc::new(ScriptedLlm::new(replies)), Arc::new(NoopDebugSink))
    }

    fn base_plan() -> ExecutionPlan {
        let mut plan = ExecutionPlan {
            original_request: "refactor config".to_string(),
            refined_goal: "refactor the config module".to_string(),
            steps: vec![
                TaskStep::new("step_1", "Read config", "Read config.rs"),
                TaskStep::new("step_2", "Apply changes", "Rewrite the loader"),
            ],
            requires_approval: false,
        };
        plan.steps[0].status = StepStatus::Done;
        plan.steps[0].result = Some("read 120 lines".to_string());
        plan
    }

    #[tokio::test]
    async fn create_parses_llm_plan() {
        let planner = planner_with(vec![Ok(r#"```json
{"refined_goal": "tidy docs", "steps": [
  {"title": "Scan", "description": "List docs", "mode": "fast_tool"},
  {"title": "Rewrite", "description": "Update each file"}
]}
```"#
            .to_string())]);
        let plan = planner.create_plan("tidy the docs", "tidy docs").await;
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].id, "step_1");
        assert_eq!(plan.steps[0].mode, AgentMode::FastTool);
        assert_eq!(plan.steps[1].mode, AgentMode::Deep);
        assert_eq!(plan.original_request, "tidy the docs");
    }

    #[tokio::test]
    async fn create_falls_back_to_single_step() {
        let planner = planner_with(vec![Err("connection refused".to_string())]);
        let plan = planner.create_plan("do the thing", "do the thing").await;
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].title, "Execute Request");
        assert!(plan.steps[0].description.contains("Direct execution: do the thing"));
    }

    #[tokio::test]
    async fn extend_keeps_original_when_steps_shrink() {
        let planner = planner_with(vec![Ok(
            r#"{"refined_goal": "g", "steps": [{"title": "only one", "description": "x"}]}"#
                .to_string(),
        )]);
        let original = base_plan();
        let extended = planner.extend_plan(&original, "add deployment step").await;
        assert_eq!(extended.steps.len(), original.steps.len());
        assert_eq!(extended.steps[0].title, "Read config");
    }

    #[tokio::test]
    async fn extend_appends_steps() {
        let planner = planner_with(vec![Ok(r#"{"refined_goal": "refactor the config module", "steps": [
  {"id": "step_1", "title": "Read config", "description": "Read config.rs", "status": "done"},
  {"id": "step_2", "title": "Apply changes", "description": "Rewrite the loader"},
  {"id": "step_3", "title": "Run tests", "description": "cargo test"}
]}"#
            .to_string())]);
        let extended = planner.extend_plan(&base_plan(), "also run tests").await;
        assert_eq!(extended.steps.len(), 3);
        assert_eq!(extended.steps[2].title, "Run tests");
    }

    #[tokio::test]
    async fn modify_restores_tampered_done_steps() {
        // 模型把 DONE 步骤丢了，只返回未完成部分
        let planner = planner_with(vec![Ok(r#"{"refined_goal": "new goal", "steps": [
  {"id": "step_2", "title": "Apply safer changes", "description": "Smaller rewrite"}
]}"#
            .to_string())]);
        let modified = planner.modify_plan(&base_plan(), "be more careful").await;
        assert_eq!(modified.steps.len(), 2);
        assert_eq!(modified.steps[0].title, "Read config");
        assert_eq!(modified.steps[0].status, StepStatus::Done);
        assert_eq!(modified.steps[0].result.as_deref(), Some("read 120 lines"));
        assert_eq!(modified.steps[1].title, "Apply safer changes");
    }

    #[tokio::test]
    async fn modify_falls_back_to_original_on_llm_failure() {
        let planner = planner_with(vec![Err("timeout".to_string())]);
        let original = base_plan();
        let modified = planner.modify_plan(&original, "whatever").await;
        assert_eq!(modified.steps.len(), original.steps.len());
        assert_eq!(modified.refined_goal, original.refined_goal);
    }
}
