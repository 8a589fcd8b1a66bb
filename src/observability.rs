//! 可观测性：tracing 初始化 + 调试事件下沉
//!
//! DebugSink 把代理内部过程（推理片段、工具请求、意图分析结果）交给
//! 注入的观察者；默认实现写入 tracing 日志，测试可注入 Noop 或采集实现。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化全局 tracing 订阅器。RUST_LOG 未设置时默认 info 级别。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 调试事件下沉。category 为固定标签（如 "reasoning" / "tool_requests"），
/// payload 为任意 JSON 负载。
pub trait DebugSink: Send + Sync {
    fn debug(&self, category: &str, payload: serde_json::Value);
}

/// 默认实现：写入 tracing 的 debug 日志
#[derive(Debug, Default)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn debug(&self, category: &str, payload: serde_json::Value) {
        tracing::debug!(category = category, payload = %payload, "agent debug");
    }
}

/// 丢弃所有调试事件
#[derive(Debug, Default)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
    fn debug(&self, _category: &str, _payload: serde_json::Value) {}
}
