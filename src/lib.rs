//! Coda - 对话式任务编排引擎
//!
//! 模块划分：
//! - **agent**: 结构化执行代理（工具调用循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、事件、会话控制信号
//! - **intent**: 意图路由（new_task / continue / modify / clarify / cancel / chat）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与会话状态持久化
//! - **orchestrator**: 会话编排器与执行循环
//! - **plan**: 计划类型与规划协作者
//! - **protocol**: 结构化工具调用协议（解析 / 格式化 / 提示词）
//! - **tools**: 工具注册表、工作区适配器与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod plan;
pub mod protocol;
pub mod tools;

pub use orchestrator::{Orchestrator, OrchestratorParts};
