//! 嵌入 API：供情景记忆使用，调用 OpenAI 兼容的 /embeddings 端点

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::openai::openai_config;
use crate::llm::{EmbeddingProvider, LlmError};

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 与 LLM 共用 OPENAI_API_KEY / base_url
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        // 官方建议把换行替换为空格
        let text = text.trim().replace('\n', " ");
        if text.is_empty() {
            return Err(LlmError::InvalidRequest("empty embedding input".into()));
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text))
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}
