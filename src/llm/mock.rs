//! Mock / 脚本化客户端（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：离线兜底，情绪评分请求返回固定 JSON，其余回显最后一条 User 消息
//! - ScriptedLlmClient：按「消息内容包含某片段」匹配预设回复，可模拟失败与多次调用序列
//! - HashEmbedder：词袋哈希嵌入，同一文本得到同一向量

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::affect::AFFECT_PROMPT_MARKER;
use crate::llm::{EmbeddingProvider, GenerationParams, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        if messages.iter().any(|m| m.content.contains(AFFECT_PROMPT_MARKER)) {
            return Ok(r#"{"valence": 0.0, "arousal": 0.3}"#.to_string());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            "I keep turning over what was said: {}",
            last_user
        ))
    }
}

struct Rule {
    needle: String,
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    delay: Option<Duration>,
}

/// 脚本化客户端：第一条命中的规则决定回复，无规则命中时返回失败；规则内多条回复依次消费，最后一条重复使用
pub struct ScriptedLlmClient {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 任意消息包含 needle 时返回 reply
    pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push_rule(needle.into(), vec![Ok(reply.into())], None)
    }

    /// 命中时依次返回 replies（用完后重复最后一条）
    pub fn on_sequence(self, needle: impl Into<String>, replies: Vec<&str>) -> Self {
        let replies = replies.into_iter().map(|r| Ok(r.to_string())).collect();
        self.push_rule(needle.into(), replies, None)
    }

    /// 命中时返回失败
    pub fn fail_on(self, needle: impl Into<String>, reason: impl Into<String>) -> Self {
        self.push_rule(needle.into(), vec![Err(LlmError::Request(reason.into()))], None)
    }

    /// 命中时先等待 delay 再回复，用于制造交错
    pub fn on_delayed(
        self,
        needle: impl Into<String>,
        reply: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.push_rule(needle.into(), vec![Ok(reply.into())], Some(delay))
    }

    /// 已收到的全部调用（按时间顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push_rule(
        mut self,
        needle: String,
        replies: Vec<Result<String, LlmError>>,
        delay: Option<Duration>,
    ) -> Self {
        self.rules.push(Rule {
            needle,
            replies: Mutex::new(replies.into()),
            delay,
        });
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let rule = self
            .rules
            .iter()
            .find(|r| messages.iter().any(|m| m.content.contains(&r.needle)));
        let Some(rule) = rule else {
            return Err(LlmError::Request("no scripted reply".into()));
        };
        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }
        let mut replies = rule
            .replies
            .lock()
            .map_err(|_| LlmError::Request("scripted rule poisoned".into()))?;
        if replies.len() > 1 {
            replies
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::EmptyResponse))
        } else {
            replies
                .front()
                .cloned()
                .unwrap_or_else(|| Err(LlmError::EmptyResponse))
        }
    }
}

/// 词袋哈希嵌入：小写分词后按哈希落桶（带符号），再做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(LlmError::InvalidRequest("nothing to embed".into()));
        }
        Ok(v.into_iter().map(|x| x / norm).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(32);
        let a = e.embed("The same words").await.unwrap();
        let b = e.embed("the SAME words").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_sequence_repeats_last() {
        let llm = ScriptedLlmClient::new().on_sequence("draft", vec!["one", "two"]);
        let msgs = [Message::user("draft please")];
        let p = GenerationParams::default();
        assert_eq!(llm.complete(&msgs, &p).await.unwrap(), "one");
        assert_eq!(llm.complete(&msgs, &p).await.unwrap(), "two");
        assert_eq!(llm.complete(&msgs, &p).await.unwrap(), "two");
        assert_eq!(llm.calls().len(), 3);
        assert!(llm.complete(&[Message::user("other")], &p).await.is_err());
    }
}
