//! LLM 层：补全 / 嵌入客户端抽象与实现（OpenAI 兼容 / Ollama / Mock）

pub mod embedding;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod timeout;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use embedding::OpenAiEmbedder;
pub use mock::{HashEmbedder, MockLlmClient, ScriptedLlmClient};
pub use ollama::{OllamaClient, OllamaEmbedder, OLLAMA_DEFAULT_BASE_URL};
pub use openai::{OpenAiClient, TokenUsage};
pub use timeout::{TimeoutEmbedder, TimeoutLlmClient};
pub use traits::{EmbeddingProvider, GenerationParams, LlmClient, LlmError};

use crate::config::AppConfig;

fn has_openai_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|k| !k.is_empty() && k != "sk-placeholder")
        .unwrap_or(false)
}

/// 根据配置与环境变量选择补全后端（OpenAI 兼容 / Ollama / Mock），并套上超时
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let inner: Arc<dyn LlmClient> = if cfg.llm.is_ollama() {
        tracing::info!("Using Ollama LLM ({})", cfg.llm.ollama.model);
        Arc::new(OllamaClient::new(
            Some(&cfg.llm.ollama.base_url),
            &cfg.llm.ollama.model,
        ))
    } else if has_openai_key() {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.openai.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.openai.model,
            None,
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    };
    Arc::new(TimeoutLlmClient::new(
        inner,
        Duration::from_secs(cfg.llm.timeouts.request),
    ))
}

/// 从应用配置创建嵌入提供方；没有可用后端时退回 HashEmbedder（维度与配置一致）
pub fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    let model = cfg.embedding.model_for(&cfg.llm);
    let inner: Arc<dyn EmbeddingProvider> = if cfg.llm.is_ollama() {
        tracing::info!("Using Ollama embeddings ({})", model);
        Arc::new(OllamaEmbedder::new(Some(&cfg.llm.ollama.base_url), &model))
    } else if has_openai_key() {
        tracing::info!("Using OpenAI embeddings ({})", model);
        Arc::new(OpenAiEmbedder::new(cfg.llm.base_url.as_deref(), &model, None))
    } else {
        tracing::debug!("embedding fallback: no OPENAI_API_KEY, using hash embedder");
        Arc::new(HashEmbedder::new(cfg.embedding.dimension_for(&cfg.llm)))
    };
    Arc::new(TimeoutEmbedder::new(
        inner,
        Duration::from_secs(cfg.llm.timeouts.request),
    ))
}
