//! 计划与会话状态类型

pub mod planner;

use serde::{Deserialize, Serialize};

use crate::memory::Message;

pub use planner::{Planner, Planning};

/// 步骤执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Chat,
    FastTool,
    Deep,
    Planning,
}

/// 步骤状态机：PENDING → IN_PROGRESS → DONE / FAILED；
/// SKIPPED 与 WAITING_FOR_USER 由计划修改与澄清流程设置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
    WaitingForUser,
}

/// 计划中的一个步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub mode: AgentMode,
}

impl TaskStep {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
            mode: AgentMode::Deep,
        }
    }
}

/// 执行计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub original_request: String,
    pub refined_goal: String,
    pub steps: Vec<TaskStep>,
    #[serde(default)]
    pub requires_approval: bool,
}

impl ExecutionPlan {
    pub fn done_steps(&self) -> impl Iterator<Item = &TaskStep> {
        self.steps.iter().filter(|s| s.status == StepStatus::Done)
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &TaskStep> {
        self.steps.iter().filter(|s| s.status == StepStatus::Pending)
    }

    pub fn all_done(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Done | StepStatus::Skipped))
    }

    /// 渲染为 Markdown 概览，用于对话历史与计划展示
    pub fn render_markdown(&self) -> String {
        let mut out = format!("## Plan: {}\n\n", self.refined_goal);
        for (i, step) in self.steps.iter().enumerate() {
            let marker = match step.status {
                StepStatus::Done => "x",
                StepStatus::Failed => "!",
                _ => " ",
            };
            out.push_str(&format!(
                "{}. [{}] {}: {}\n",
                i + 1,
                marker,
                step.title,
                step.description
            ));
        }
        if self.requires_approval {
            out.push_str("\nAwaiting approval before execution.\n");
        }
        out
    }

    /// 下一个未占用的步骤 id（step_N 形式）
    pub fn next_id(&self) -> String {
        let mut n = self.steps.len() + 1;
        loop {
            let candidate = format!("step_{}", n);
            if !self.steps.iter().any(|s| s.id == candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// 会话状态：持久化与恢复的单元
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub interaction_id: String,
    #[serde(default)]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub waiting_for_input: bool,
}
