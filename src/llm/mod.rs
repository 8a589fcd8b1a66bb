//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, ScriptedLlm};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::AppConfig;

/// 根据配置创建 LLM 客户端。provider=mock 或无 API Key 时用 Mock（后者记 warn）。
pub fn create_llm_from_config(config: &AppConfig) -> Arc<dyn LlmClient> {
    if config.llm.provider == "mock" {
        return Arc::new(MockLlmClient);
    }
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match api_key {
        Some(key) if !key.is_empty() => Arc::new(OpenAiClient::new(
            config.llm.base_url.as_deref(),
            &config.llm.model,
            Some(&key),
        )),
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, falling back to mock LLM client");
            Arc::new(MockLlmClient)
        }
    }
}
