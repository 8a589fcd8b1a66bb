//! Mock LLM 客户端（用于测试与无 API Key 场景）
//!
//! MockLlmClient 取最后一条 User 消息，回显为结构化 final_response JSON，
//! 便于本地跑通编排流程。ScriptedLlm 按脚本逐条吐出预置响应，供测试驱动
//! 多轮对话。

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::LlmClient;
use crate::memory::Message;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let response = serde_json::json!({
            "response_type": "final_response",
            "reasoning": "mock echo",
            "tools": [],
            "response": format!("Echo from Mock: {}", last_user),
            "confidence": 1.0,
        });
        Ok(response.to_string())
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>, String>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}

/// 脚本化客户端：每次 complete 弹出队首响应；脚本耗尽后返回错误。
/// calls() 返回累计调用次数，供测试断言 LLM 调用预算。
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<std::collections::VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 便捷构造：全部成功响应
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .map_err(|_| "scripted llm poisoned".to_string())?
            .pop_front();
        next.unwrap_or_else(|| Err("script exhausted".to_string()))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>, String>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
