//! 情景记忆：按向量相似度读写每个 Agent 的私有记忆
//!
//! - 读取失败一律降级为空结果，不影响回合
//! - 写入前经过写入门；通过后必须先成功计算向量，失败则放弃（不重试、不落无向量记录）

use std::sync::Arc;

use thiserror::Error;

use crate::llm::{EmbeddingProvider, LlmError};
use crate::memory::store::{NewMemory, ScoredMemory, Store, StoreError};
use crate::memory::Message;

/// 不产生实质内容的角色，其回复不写入记忆
const NON_SUBSTANTIVE_ROLES: [&str; 4] = ["router", "merger", "system", "user"];

const ERROR_MARKERS: [&str; 2] = ["error:", "error processing"];

const MIN_TOKENS: usize = 5;

/// 每个 Agent 每回合最多放入上下文的回忆条数
pub const MAX_RECOLLECTIONS: usize = 3;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// 写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(i64),
    /// 被写入门拒绝
    Skipped,
}

/// 写入门：空文本、字面量 "none"、以错误标记开头、不足 5 个词的文本不写
pub fn should_write_memory(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if ERROR_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return false;
    }
    trimmed.split_whitespace().count() >= MIN_TOKENS
}

/// 在写入门基础上排除 router / merger / system / user 角色
pub fn should_write_memory_for(agent: &str, text: &str) -> bool {
    let role = agent.trim().to_lowercase();
    if NON_SUBSTANTIVE_ROLES.contains(&role.as_str()) {
        return false;
    }
    should_write_memory(text)
}

/// 把检索到的记忆渲染为一条 system 消息；无记忆时返回 None
pub fn render_recollections(agent: &str, memories: &[ScoredMemory]) -> Option<Message> {
    if memories.is_empty() {
        return None;
    }
    let mut text = format!("[Prior relevant thoughts for {}]:", agent);
    for m in memories {
        let prompt = m
            .record
            .user_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or("prior context");
        text.push_str(&format!(
            "\nRecalled memory: {} (In response to: {})",
            m.record.text, prompt
        ));
    }
    Some(Message::system(text))
}

pub struct EpisodicMemory {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
}

impl EpisodicMemory {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn Store>) -> Self {
        Self { embedder, store }
    }

    /// 检索该 Agent 与 query 最接近的至多 k 条记忆；任何失败返回空
    pub async fn retrieve(&self, agent: &str, query: &str, k: usize) -> Vec<ScoredMemory> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("memory retrieve for {}: embedding failed: {}", agent, e);
                return Vec::new();
            }
        };
        let mut found = match self.store.nearest_memories(agent, &vector, k).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("memory retrieve for {}: query failed: {}", agent, e);
                return Vec::new();
            }
        };
        found.retain(|m| m.record.agent == agent);
        found.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.record.created_at.cmp(&b.record.created_at))
                .then(a.record.id.cmp(&b.record.id))
        });
        found.truncate(k);

        let ids: Vec<i64> = found.iter().map(|m| m.record.id).collect();
        if let Err(e) = self.store.record_recall(&ids).await {
            tracing::warn!("memory recall bookkeeping for {} failed: {}", agent, e);
        }
        tracing::debug!("memory retrieve for {}: {} hit(s)", agent, found.len());
        found
    }

    /// 经写入门后计算向量并持久化
    pub async fn write(
        &self,
        agent: &str,
        text: &str,
        valence: Option<f32>,
        arousal: Option<f32>,
        user_prompt: Option<&str>,
    ) -> Result<WriteOutcome, MemoryError> {
        if !should_write_memory_for(agent, text) {
            tracing::debug!("memory write for {} skipped by gate", agent);
            return Ok(WriteOutcome::Skipped);
        }
        let embedding = self.embedder.embed(text).await?;
        let id = self
            .store
            .insert_memory(NewMemory {
                agent: agent.to_string(),
                text: text.to_string(),
                embedding,
                valence,
                arousal,
                user_prompt: user_prompt.map(str::to_string),
            })
            .await?;
        Ok(WriteOutcome::Written(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySection;
    use crate::llm::HashEmbedder;
    use crate::memory::store::SqliteStore;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Request("offline".into()))
        }
    }

    fn episodic(dim: usize, embedder: Arc<dyn EmbeddingProvider>) -> (EpisodicMemory, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory(dim, &MemorySection::default()).unwrap());
        (EpisodicMemory::new(embedder, store.clone()), store)
    }

    #[test]
    fn test_write_gate() {
        assert!(!should_write_memory("ok"));
        assert!(!should_write_memory("Error: failed"));
        assert!(!should_write_memory("error processing the reply for this turn"));
        assert!(!should_write_memory("  NONE "));
        assert!(!should_write_memory(""));
        assert!(!should_write_memory("only four words here"));
        assert!(should_write_memory("This is a sufficiently long reflective reply."));
        assert!(!should_write_memory_for(
            "Router",
            "This is a sufficiently long reflective reply."
        ));
        assert!(should_write_memory_for(
            "Ego",
            "This is a sufficiently long reflective reply."
        ));
    }

    #[test]
    fn test_render_recollections_format() {
        use crate::memory::store::MemoryRecord;
        let record = |text: &str, prompt: Option<&str>| ScoredMemory {
            record: MemoryRecord {
                id: 1,
                agent: "Id".into(),
                text: text.into(),
                embedding: Vec::new(),
                valence: None,
                arousal: None,
                user_prompt: prompt.map(str::to_string),
                created_at: chrono::Utc::now(),
                recall_count: 0,
                last_recalled_at: None,
            },
            distance: 0.1,
        };
        assert!(render_recollections("Id", &[]).is_none());
        let msg = render_recollections("Id", &[record("I want it", Some("what now?")), record("later", None)])
            .unwrap();
        assert_eq!(
            msg.content,
            "[Prior relevant thoughts for Id]:\n\
             Recalled memory: I want it (In response to: what now?)\n\
             Recalled memory: later (In response to: prior context)"
        );
    }

    #[tokio::test]
    async fn test_write_then_retrieve_same_record() {
        let (mem, _store) = episodic(64, Arc::new(HashEmbedder::new(64)));
        let text = "I remember the lake was cold that morning.";
        let outcome = mem.write("Ego", text, Some(0.1), Some(0.4), Some("tell me")).await.unwrap();
        let WriteOutcome::Written(id) = outcome else {
            panic!("expected write");
        };
        mem.write("Ego", "Something entirely different happened at the market later.", None, None, None)
            .await
            .unwrap();

        let hits = mem.retrieve("Ego", text, 3).await;
        assert_eq!(hits[0].record.id, id);
        assert!(hits[0].distance < 1e-4);
        assert!(hits.len() <= 3);
        for w in hits.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
        assert!(hits.iter().all(|h| h.record.agent == "Ego"));
        assert!(mem.retrieve("Id", text, 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_gate_rejects_without_touching_store() {
        let (mem, store) = episodic(16, Arc::new(HashEmbedder::new(16)));
        assert_eq!(mem.write("Id", "ok", None, None, None).await.unwrap(), WriteOutcome::Skipped);
        let listed = store
            .list_memories("Id", Default::default(), Default::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_abandons_write_and_retrieve_is_soft() {
        let (mem, store) = episodic(16, Arc::new(FailingEmbedder));
        let err = mem
            .write("Id", "This reply is long enough to be stored.", None, None, None)
            .await;
        assert!(matches!(err, Err(MemoryError::Embedding(_))));
        assert!(store
            .list_memories("Id", Default::default(), Default::default())
            .await
            .unwrap()
            .is_empty());
        assert!(mem.retrieve("Id", "anything at all", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let store = Arc::new(SqliteStore::open_in_memory(8, &MemorySection::default()).unwrap());
        let mem = EpisodicMemory::new(Arc::new(HashEmbedder::new(4)), store);
        let err = mem
            .write("Id", "This reply is long enough to be stored.", None, None, None)
            .await;
        assert!(matches!(
            err,
            Err(MemoryError::Store(StoreError::DimensionMismatch { expected: 8, actual: 4 }))
        ));
    }

    #[tokio::test]
    async fn test_retrieve_counts_recalls() {
        let (mem, store) = episodic(32, Arc::new(HashEmbedder::new(32)));
        mem.write("Superego", "We ought to keep the promise we made.", None, None, None)
            .await
            .unwrap();
        mem.retrieve("Superego", "promise", 1).await;
        let listed = store
            .list_memories("Superego", Default::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(listed[0].recall_count, 1);
    }
}
