//! 超时装饰器：为任意 LlmClient / EmbeddingProvider 加单次调用超时，限制整轮最坏延迟

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{EmbeddingProvider, GenerationParams, LlmClient, LlmError};
use crate::memory::Message;

pub struct TimeoutLlmClient {
    inner: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl TimeoutLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LlmClient for TimeoutLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        tokio::time::timeout(self.timeout, self.inner.complete(messages, params))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

pub struct TimeoutEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl EmbeddingProvider for TimeoutEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        tokio::time::timeout(self.timeout, self.inner.embed(text))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_slow_completion_times_out() {
        let client = TimeoutLlmClient::new(Arc::new(SlowClient), Duration::from_millis(20));
        let result = client
            .complete(&[Message::user("hi")], &GenerationParams::default())
            .await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }
}
