//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；脚本耗尽后返回 fallback。每次调用计固定 token。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Completion, LlmClient, LlmError, Message};

/// Mock 客户端：脚本化回复
#[derive(Debug)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: String,
    tokens_per_call: (u64, u64),
    /// 收到的最后一条 User 消息（便于断言 prompt 内容）
    last_prompt: Mutex<Option<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: r#"{"intent": "no-op", "confidence": 1.0, "actionable": false, "actions": []}"#
                .to_string(),
            tokens_per_call: (100, 50),
            last_prompt: Mutex::new(None),
        }
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    pub fn with_error(self, err: LlmError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = reply.into();
        self
    }

    pub fn with_tokens(mut self, prompt: u64, completion: u64) -> Self {
        self.tokens_per_call = (prompt, completion);
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    fn push(&self, reply: Result<String, LlmError>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::Role::User))
            .map(|m| m.content.clone());
        if let Ok(mut p) = self.last_prompt.lock() {
            *p = last_user;
        }

        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let content = match next {
            Some(reply) => reply?,
            None => self.fallback.clone(),
        };
        Ok(Completion {
            content,
            prompt_tokens: self.tokens_per_call.0,
            completion_tokens: self.tokens_per_call.1,
        })
    }
}
