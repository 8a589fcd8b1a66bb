//! 执行代理层

pub mod structured;

pub use structured::{AgentOutcome, StructuredAgent, TaskContext};
