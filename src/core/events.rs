//! 编排过程事件：供观察者（UI / 前端）重建界面状态
//!
//! 事件按因果顺序发出（step_start → tool 事件 → step_complete），携带足够的
//! id / 状态 / 负载，观察者无需轮询即可还原会话状态。

use serde::Serialize;

use crate::plan::{ExecutionPlan, TaskStep};
use crate::protocol::{ToolCall, ToolResult};

/// 编排事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 新计划已创建
    PlanCreated { plan: ExecutionPlan },
    /// 计划被扩展 / 修改 / 恢复后的完整快照
    PlanUpdated { plan: ExecutionPlan },
    /// 计划等待用户批准（show_plan_only 或 requires_approval）
    PlanApprovalNeeded { plan: ExecutionPlan },
    /// 计划被取消，持久化状态已清空
    PlanCancelled,
    /// 开始执行某步骤
    StepStart { step: TaskStep },
    /// 步骤状态变更（status 为序列化后的状态名，或 "paused"）
    StepUpdate {
        id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// 步骤执行成功
    StepComplete { id: String, result: String },
    /// 工具调用开始
    ToolStart { call: ToolCall },
    /// 工具调用结束（含成功 / 失败与耗时）
    ToolEnd { result: ToolResult },
    /// 闲聊 / 总结回复的一小段（流式输出）
    ChatChunk { text: String },
    /// 闲聊 / 总结回复结束
    ChatComplete { response: String },
    /// 澄清回答的一小段
    ClarificationChunk { text: String },
    /// 澄清回答结束
    ClarificationComplete { response: String },
    /// 错误（附带「可恢复」提示文案）
    Error { text: String },
}

/// 事件发送端：无界 mpsc，接收方掉线时事件被丢弃而非阻塞编排
pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

/// 发送事件；无接收方时静默丢弃（观察者缺席不得影响控制流）
pub fn emit(tx: Option<&EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
