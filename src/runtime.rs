//! 运行时装配：启动时一次性构造补全 / 嵌入 / 持久化等服务并显式传递
//!
//! 两个入口二进制（控制台、Web）都只通过 `Runtime` 访问核心。

use std::sync::Arc;

use futures_util::Stream;
use thiserror::Error;

use crate::config::{load_roster, AppConfig, Roster, RosterError};
use crate::core::{TurnOrchestrator, TurnSettings};
use crate::llm::{
    create_embedder_from_config, create_llm_from_config, EmbeddingProvider, GenerationParams,
    LlmClient,
};
use crate::memory::{
    ClearSummary, Conversation, EpisodicMemory, SqliteStore, Store, StoreError, WorkingMemory,
};
use crate::stream::{TurnEvent, TurnStream};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("roster error: {0}")]
    Roster(#[from] RosterError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Runtime {
    pub config: AppConfig,
    pub roster: Roster,
    pub orchestrator: Arc<TurnOrchestrator>,
}

/// 按配置构造全部服务：名册、补全客户端、嵌入提供方、SQLite 存储
pub fn build_runtime(cfg: AppConfig) -> Result<Runtime, RuntimeError> {
    let roster = load_roster(&cfg.app.prompts_path, &cfg.llm)?;
    let llm = create_llm_from_config(&cfg);
    let embedder = create_embedder_from_config(&cfg);
    let dimension = cfg.embedding.dimension_for(&cfg.llm);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(
        &cfg.app.database_path,
        dimension,
        &cfg.memory,
    )?);
    tracing::info!(
        "Runtime ready: {} agents, database {:?}, embedding dimension {}",
        roster.agents.len(),
        cfg.app.database_path,
        dimension
    );
    Ok(assemble(cfg, roster, llm, embedder, store))
}

/// 用已构造好的服务装配（测试中注入脚本化客户端与内存数据库）
pub fn assemble(
    cfg: AppConfig,
    roster: Roster,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
) -> Runtime {
    let episodic = Arc::new(EpisodicMemory::new(embedder, store.clone()));
    let working = Arc::new(WorkingMemory::new(
        cfg.app.history_pairs,
        cfg.app.working_memory_windows,
    ));
    let settings = TurnSettings {
        retrieve_k: cfg.app.retrieve_k,
        affect_params: GenerationParams::with_model(cfg.llm.agent_model()).temperature(0.0),
    };
    let orchestrator = Arc::new(TurnOrchestrator::new(
        llm, store, episodic, working, &roster, settings,
    ));
    Runtime {
        config: cfg,
        roster,
        orchestrator,
    }
}

impl Runtime {
    pub async fn create_conversation(&self) -> Result<Conversation, StoreError> {
        self.orchestrator.store().create_conversation().await
    }

    /// 启动一个回合并返回事件流
    pub fn start_turn(
        &self,
        conversation_id: impl Into<String>,
        utterance: impl Into<String>,
    ) -> impl Stream<Item = TurnEvent> + Send + 'static {
        TurnStream::start(self.orchestrator.clone(), conversation_id, utterance)
    }

    pub async fn clear_all(&self) -> Result<ClearSummary, StoreError> {
        self.orchestrator.clear_all().await
    }

    /// 清空全部数据并开启一个新会话；此前的会话 id 随之失效
    pub async fn reset(&self) -> Result<(ClearSummary, Conversation), StoreError> {
        let summary = self.clear_all().await?;
        let conversation = self.create_conversation().await?;
        tracing::info!("Conversation {} started after clear", conversation.id);
        Ok((summary, conversation))
    }
}
