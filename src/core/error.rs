//! 编排引擎错误类型

use thiserror::Error;

/// 引擎各层共用的错误。工具执行失败不走这里向上冒泡，执行器会把它
/// 折叠为 success=false 的结果；这里承载的是无法就地消化的失败。
#[derive(Debug, Error)]
pub enum AgentError {
    /// 模型输出不符合结构化协议
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// 工具执行失败
    #[error("{0}")]
    ToolFailed(String),

    /// 路径越出工作区根目录
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    /// LLM 传输层失败（连接 / 认证 / 限流）
    #[error("llm call failed: {0}")]
    Llm(String),

    /// 会话状态持久化失败
    #[error("persistence failed: {0}")]
    Persistence(String),
}
