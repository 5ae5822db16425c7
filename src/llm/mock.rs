//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序弹出预置回复：可以是纯文本，也可以是工具调用，便于本地驱动整条记忆处理流水线。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatReply, LlmClient, LlmError, Message, ToolCall, ToolSpec};

/// 脚本化 Mock 客户端：每次 chat 弹出一条预置回复；脚本耗尽后返回 fallback 文本
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ChatReply>>,
    fallback: String,
    call_id: AtomicU64,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本耗尽后的兜底文本（默认空串）
    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = content.into();
        self
    }

    /// 预置一条纯文本回复
    pub fn push_content(&self, content: impl Into<String>) {
        self.replies.lock().unwrap().push_back(ChatReply {
            content: content.into(),
            tool_calls: Vec::new(),
        });
    }

    /// 预置一条单工具调用回复
    pub fn push_tool_call(&self, name: impl Into<String>, arguments: serde_json::Value) {
        let id = self.call_id.fetch_add(1, Ordering::Relaxed);
        self.replies.lock().unwrap().push_back(ChatReply {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call_{id}"),
                name: name.into(),
                arguments: arguments.to_string(),
            }],
        });
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<ChatReply, LlmError> {
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or(ChatReply {
            content: self.fallback.clone(),
            tool_calls: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlm::new().with_fallback("done");
        llm.push_content("first");
        llm.push_tool_call("some_tool", serde_json::json!({"k": 1}));

        let r1 = llm.chat(&[], &[]).await.unwrap();
        assert_eq!(r1.content, "first");

        let r2 = llm.chat(&[], &[]).await.unwrap();
        assert_eq!(r2.tool_calls.len(), 1);
        assert_eq!(r2.tool_calls[0].name, "some_tool");

        let r3 = llm.chat(&[], &[]).await.unwrap();
        assert_eq!(r3.content, "done");
    }
}
