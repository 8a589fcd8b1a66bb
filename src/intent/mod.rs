//! 意图路由：把用户输入分类为会话动作
//!
//! 路由器用 LLM 在当前计划摘要的上下文里给输入分类；分类从不让会话
//! 失败，LLM 出错或输出不可解析时回退为低置信度的澄清意图。显式的
//! 规划措辞（"create a plan" / "制定计划" 等）绕过 LLM 直接判为新任务
//! 并只展示计划。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::observability::DebugSink;
use crate::plan::ExecutionPlan;
use crate::protocol;

/// 会话意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    NewTask,
    #[serde(rename = "continue")]
    ContinueTask,
    #[serde(rename = "modify")]
    ModifyCurrent,
    #[serde(rename = "clarify")]
    Clarification,
    Cancel,
    Chat,
}

/// 意图分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: IntentKind,
    /// 对用户输入的精炼复述，供规划器使用
    #[serde(default)]
    pub refined_prompt: String,
    #[serde(default)]
    pub original_prompt: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    /// 指代消解结果（"那个文件" → 具体路径）
    #[serde(default)]
    pub resolved_references: HashMap<String, String>,
    #[serde(default)]
    pub relevant_context: String,
    /// 只生成并展示计划，不立即执行
    #[serde(default)]
    pub show_plan_only: bool,
}

fn default_confidence() -> f32 {
    1.0
}

impl IntentAnalysis {
    /// 兜底结果：请求澄清，低置信度
    pub fn fallback(input: &str) -> Self {
        Self {
            intent: IntentKind::Clarification,
            refined_prompt: input.to_string(),
            original_prompt: input.to_string(),
            confidence: 0.5,
            reasoning: "classification unavailable, asking for clarification".to_string(),
            resolved_references: HashMap::new(),
            relevant_context: String::new(),
            show_plan_only: false,
        }
    }
}

const INTENT_SYSTEM_PROMPT: &str = r#"You classify a user message within an ongoing task session. Respond with a single JSON object only:

{
  "intent": "new_task" | "continue" | "modify" | "clarify" | "cancel" | "chat",
  "refined_prompt": "the user's request restated precisely",
  "confidence": 0.0-1.0,
  "reasoning": "one sentence",
  "resolved_references": {"that file": "src/config.rs"},
  "relevant_context": "notes tying this message to the active plan, if any",
  "show_plan_only": false
}

Guidance:
- "new_task": a fresh goal unrelated to the active plan.
- "continue": approval or a nudge to proceed with the active plan.
- "modify": feedback changing the remaining steps of the active plan.
- "clarify": a question about the plan or its results.
- "cancel": abandon the active plan.
- "chat": small talk or questions unrelated to any task."#;

/// 显式规划措辞：无需 LLM 即可判定
const PLANNING_PHRASES: &[&str] = &[
    "create a plan",
    "make a plan",
    "draft a plan",
    "plan for",
    "plan out",
    "制定计划",
    "制定一个计划",
    "列个计划",
    "规划一下",
    "先做计划",
];

fn wants_plan_only(input: &str) -> bool {
    let lower = input.to_lowercase();
    PLANNING_PHRASES.iter().any(|p| lower.contains(p))
}

/// 基于 LLM 的意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    debug: Arc<dyn DebugSink>,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>, debug: Arc<dyn DebugSink>) -> Self {
        Self { llm, debug }
    }

    /// 把当前计划压缩成分类上下文：目标、最近完成步骤及结果片段、
    /// 最多 3 个待执行步骤标题。
    pub fn plan_context(plan: Option<&ExecutionPlan>) -> String {
        let Some(plan) = plan else {
            return "No active plan.".to_string();
        };
        let mut ctx = format!("Active plan goal: {}\n", plan.refined_goal);
        if let Some(last_done) = plan.done_steps().last() {
            ctx.push_str(&format!("Last completed step: {}\n", last_done.title));
            if let Some(result) = &last_done.result {
                let snippet: String = result.chars().take(200).collect();
                ctx.push_str(&format!("Its result: {}\n", snippet));
            }
        }
        let pending: Vec<&str> = plan
            .pending_steps()
            .take(3)
            .map(|s| s.title.as_str())
            .collect();
        if !pending.is_empty() {
            ctx.push_str(&format!("Next pending steps: {}\n", pending.join("; ")));
        }
        ctx
    }

    /// 分类用户输入。从不返回错误。
    pub async fn analyze(&self, input: &str, plan: Option<&ExecutionPlan>) -> IntentAnalysis {
        if wants_plan_only(input) {
            let mut analysis = IntentAnalysis::fallback(input);
            analysis.intent = IntentKind::NewTask;
            analysis.confidence = 1.0;
            analysis.reasoning = "explicit planning request".to_string();
            analysis.show_plan_only = true;
            return analysis;
        }

        let messages = vec![
            Message::system(INTENT_SYSTEM_PROMPT),
            Message::user(format!(
                "{}\nUser message: {}",
                Self::plan_context(plan),
                input
            )),
        ];

        let raw = match self.llm.complete(&messages).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "intent classification llm call failed");
                return IntentAnalysis::fallback(input);
            }
        };

        let mut analysis = protocol::extract_json_block(&raw)
            .and_then(|block| serde_json::from_str::<IntentAnalysis>(&block).ok())
            .unwrap_or_else(|| IntentAnalysis::fallback(input));

        analysis.original_prompt = input.to_string();
        if analysis.refined_prompt.is_empty() {
            analysis.refined_prompt = input.to_string();
        }
        analysis.confidence = analysis.confidence.clamp(0.0, 1.0);

        self.debug.debug(
            "intent_analysis",
            serde_json::json!({
                "intent": analysis.intent,
                "confidence": analysis.confidence,
                "show_plan_only": analysis.show_plan_only,
            }),
        );
        analysis
    }
}
