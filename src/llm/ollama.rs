//! Ollama 本地模型客户端
//!
//! 直接用 reqwest 调 Ollama HTTP API：/api/chat（非流式）与 /api/embeddings。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{EmbeddingProvider, GenerationParams, LlmClient, LlmError};
use crate::memory::Message;

pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Default)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Ollama 对话客户端
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<&str>, default_model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(OLLAMA_DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            default_model: default_model.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: params.model.as_deref().unwrap_or(&self.default_model),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("ollama chat {}: {}", status, text)));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let content = parsed
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Ollama 嵌入客户端
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: Option<&str>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(OLLAMA_DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!(
                "ollama embeddings {}: {}",
                status, text
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if parsed.embedding.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed.embedding)
    }
}
