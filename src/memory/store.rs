//! 持久化：会话、消息与情景记忆（SQLite + 内存 LSH 索引）
//!
//! 连接与索引放在同一把锁之下，所有操作经 `spawn_blocking` 执行，不阻塞 async 运行时。
//! 向量以小端 f32 BLOB 存储；打开数据库时从表中重建索引。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MemorySection;
use crate::memory::ann::AnnIndex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// 消息类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Agent,
    Psyche,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Psyche => "psyche",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "agent" => Some(Self::Agent),
            "psyche" => Some(Self::Psyche),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// 会话列表项：首条用户消息的前 100 个字符作预览
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub preview: String,
}

pub const PREVIEW_CHARS: usize = 100;
pub const EMPTY_PREVIEW: &str = "(No user messages yet)";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    pub kind: MessageKind,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    /// 开启本轮的用户消息 id（用户消息即自身 id）
    pub turn_id: String,
    pub created_at: DateTime<Utc>,
}

/// 待写入的消息；`turn_id` 为空时使用新消息自身的 id
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    pub kind: MessageKind,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    pub turn_id: Option<String>,
}

/// 情景记忆记录；除回忆计数外写入后不再修改
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub agent: String,
    pub text: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    pub user_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub recall_count: u32,
    pub last_recalled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct NewMemory {
    pub agent: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    pub user_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySort {
    #[default]
    Timestamp,
    RecallCount,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// 清空结果：各表删除的行数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub messages: usize,
    pub conversations: usize,
    pub memories: usize,
}

/// 持久化协作方
#[async_trait]
pub trait Store: Send + Sync {
    /// 向量维度 D
    fn dimension(&self) -> usize;

    async fn create_conversation(&self) -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// 最新的会话在前
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn append_message(&self, msg: NewMessage) -> Result<StoredMessage, StoreError>;

    /// 按写入顺序返回会话内全部消息
    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// 写入记忆；向量长度必须等于 D
    async fn insert_memory(&self, memory: NewMemory) -> Result<i64, StoreError>;

    /// 该 Agent 距离 `query` 最近的至多 k 条记录，按余弦距离升序
    async fn nearest_memories(
        &self,
        agent: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredMemory>, StoreError>;

    /// 回忆计数 +1 并刷新最近回忆时间
    async fn record_recall(&self, ids: &[i64]) -> Result<(), StoreError>;

    async fn list_memories(
        &self,
        agent: &str,
        sort: MemorySort,
        order: SortOrder,
    ) -> Result<Vec<MemoryRecord>, StoreError>;

    /// 在一个事务内删除全部会话、消息与记忆
    async fn clear_all(&self) -> Result<ClearSummary, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id          TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    sender          TEXT NOT NULL,
    text            TEXT NOT NULL,
    kind            TEXT NOT NULL,
    valence         REAL,
    arousal         REAL,
    turn_id         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);
CREATE TABLE IF NOT EXISTS memories (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name       TEXT NOT NULL,
    text             TEXT NOT NULL,
    embedding        BLOB NOT NULL,
    valence          REAL,
    arousal          REAL,
    user_prompt      TEXT,
    created_at       TEXT NOT NULL,
    recall_count     INTEGER NOT NULL DEFAULT 0,
    last_recalled_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_name);
";

const MEMORY_COLUMNS: &str = "id, agent_name, text, embedding, valence, arousal, user_prompt, \
                              created_at, recall_count, last_recalled_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender, text, kind, valence, arousal, turn_id, created_at";

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_vec(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let blob: Vec<u8> = row.get(3)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        agent: row.get(1)?,
        text: row.get(2)?,
        embedding: blob_to_vec(&blob),
        valence: row.get::<_, Option<f64>>(4)?.map(|v| v as f32),
        arousal: row.get::<_, Option<f64>>(5)?.map(|v| v as f32),
        user_prompt: row.get(6)?,
        created_at: row.get(7)?,
        recall_count: row.get::<_, i64>(8)?.max(0) as u32,
        last_recalled_at: row.get(9)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let kind: String = row.get(4)?;
    let kind = MessageKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(4, "kind".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        text: row.get(3)?,
        kind,
        valence: row.get::<_, Option<f64>>(5)?.map(|v| v as f32),
        arousal: row.get::<_, Option<f64>>(6)?.map(|v| v as f32),
        turn_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn preview_of(first_user_text: Option<String>) -> String {
    match first_user_text {
        Some(text) => text.chars().take(PREVIEW_CHARS).collect(),
        None => EMPTY_PREVIEW.to_string(),
    }
}

struct Inner {
    conn: Connection,
    index: AnnIndex,
}

/// SQLite 实现
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Inner>>,
    dimension: usize,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件，并从已有记忆重建索引
    pub fn open(
        path: impl AsRef<Path>,
        dimension: usize,
        memory: &MemorySection,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, dimension, memory)
    }

    /// 内存数据库（测试与临时运行）
    pub fn open_in_memory(dimension: usize, memory: &MemorySection) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, dimension, memory)
    }

    fn from_connection(
        conn: Connection,
        dimension: usize,
        memory: &MemorySection,
    ) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        let mut index = AnnIndex::new(dimension, memory);
        let mut skipped = 0usize;
        {
            let mut stmt = conn.prepare("SELECT id, agent_name, embedding, created_at FROM memories")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            })?;
            for row in rows {
                let (id, agent, blob, created_at) = row?;
                let vector = blob_to_vec(&blob);
                if vector.len() != dimension {
                    skipped += 1;
                    continue;
                }
                index.insert(&agent, id, vector, created_at.timestamp_millis());
            }
        }
        if skipped > 0 {
            tracing::warn!(
                "store: {} stored memories have a different dimension than {} and are not indexed",
                skipped,
                dimension
            );
        }
        tracing::info!("store: indexed {} memories (dimension {})", index.len(), dimension);

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { conn, index })),
            dimension,
        })
    }

    async fn execute<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Inner) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn create_conversation(&self) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        let row = conversation.clone();
        self.execute(move |inner| {
            inner.conn.execute(
                "INSERT INTO conversations (id, created_at) VALUES (?1, ?2)",
                params![row.id, row.created_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let id = id.to_string();
        self.execute(move |inner| {
            let found = inner
                .conn
                .query_row(
                    "SELECT id, created_at FROM conversations WHERE id = ?1",
                    [&id],
                    |row| {
                        Ok(Conversation {
                            id: row.get(0)?,
                            created_at: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.execute(|inner| {
            let mut stmt = inner.conn.prepare(
                "SELECT c.id, c.created_at, \
                   (SELECT m.text FROM messages m \
                     WHERE m.conversation_id = c.id AND m.kind = 'user' \
                     ORDER BY m.seq ASC LIMIT 1) \
                 FROM conversations c ORDER BY c.created_at DESC, c.rowid DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ConversationSummary {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        preview: preview_of(row.get(2)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn append_message(&self, msg: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let stored = StoredMessage {
            turn_id: msg.turn_id.unwrap_or_else(|| id.clone()),
            id,
            conversation_id: msg.conversation_id,
            sender: msg.sender,
            text: msg.text,
            kind: msg.kind,
            valence: msg.valence,
            arousal: msg.arousal,
            created_at: Utc::now(),
        };
        let row = stored.clone();
        self.execute(move |inner| {
            inner.conn.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    row.id,
                    row.conversation_id,
                    row.sender,
                    row.text,
                    row.kind.as_str(),
                    row.valence.map(f64::from),
                    row.arousal.map(f64::from),
                    row.turn_id,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(stored)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.execute(move |inner| {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt
                .query_map([&conversation_id], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn insert_memory(&self, memory: NewMemory) -> Result<i64, StoreError> {
        if memory.embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: memory.embedding.len(),
            });
        }
        let now = Utc::now();
        self.execute(move |inner| {
            inner.conn.execute(
                "INSERT INTO memories \
                 (agent_name, text, embedding, valence, arousal, user_prompt, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    memory.agent,
                    memory.text,
                    vec_to_blob(&memory.embedding),
                    memory.valence.map(f64::from),
                    memory.arousal.map(f64::from),
                    memory.user_prompt,
                    now,
                ],
            )?;
            let id = inner.conn.last_insert_rowid();
            inner
                .index
                .insert(&memory.agent, id, memory.embedding, now.timestamp_millis());
            Ok(id)
        })
        .await
    }

    async fn nearest_memories(
        &self,
        agent: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredMemory>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let agent = agent.to_string();
        let query = query.to_vec();
        self.execute(move |inner| {
            let hits = inner.index.search(&agent, &query, k);
            let mut stmt = inner
                .conn
                .prepare(&format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"))?;
            let mut out = Vec::with_capacity(hits.len());
            for hit in hits {
                if let Some(record) = stmt.query_row([hit.id], row_to_memory).optional()? {
                    out.push(ScoredMemory {
                        record,
                        distance: hit.distance,
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    async fn record_recall(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        let now = Utc::now();
        self.execute(move |inner| {
            let tx = inner.conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "UPDATE memories SET recall_count = recall_count + 1, last_recalled_at = ?2 \
                     WHERE id = ?1",
                )?;
                for id in ids {
                    stmt.execute(params![id, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_memories(
        &self,
        agent: &str,
        sort: MemorySort,
        order: SortOrder,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let agent = agent.to_string();
        let column = match sort {
            MemorySort::Timestamp => "created_at",
            MemorySort::RecallCount => "recall_count",
        };
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        self.execute(move |inner| {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories WHERE agent_name = ?1 \
                 ORDER BY {column} {direction}, id {direction}"
            ))?;
            let rows = stmt
                .query_map([&agent], row_to_memory)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn clear_all(&self) -> Result<ClearSummary, StoreError> {
        self.execute(|inner| {
            let tx = inner.conn.transaction()?;
            let messages = tx.execute("DELETE FROM messages", [])?;
            let conversations = tx.execute("DELETE FROM conversations", [])?;
            let memories = tx.execute("DELETE FROM memories", [])?;
            tx.commit()?;
            inner.index.clear();
            Ok(ClearSummary {
                messages,
                conversations,
                memories,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dim: usize) -> SqliteStore {
        SqliteStore::open_in_memory(dim, &MemorySection::default()).unwrap()
    }

    fn memory(agent: &str, text: &str, embedding: Vec<f32>) -> NewMemory {
        NewMemory {
            agent: agent.to_string(),
            text: text.to_string(),
            embedding,
            valence: Some(0.2),
            arousal: None,
            user_prompt: Some("why?".to_string()),
        }
    }

    fn user_message(conversation_id: &str, text: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender: "User".to_string(),
            text: text.to_string(),
            kind: MessageKind::User,
            valence: None,
            arousal: None,
            turn_id: None,
        }
    }

    #[test]
    fn test_blob_codec() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[tokio::test]
    async fn test_conversation_messages_and_preview() {
        let s = store(4);
        let c = s.create_conversation().await.unwrap();
        assert!(s.get_conversation(&c.id).await.unwrap().is_some());
        assert!(s.get_conversation("missing").await.unwrap().is_none());

        let listed = s.list_conversations().await.unwrap();
        assert_eq!(listed[0].preview, EMPTY_PREVIEW);

        let long = "x".repeat(150);
        let user = s.append_message(user_message(&c.id, &long)).await.unwrap();
        assert_eq!(user.turn_id, user.id);
        let reply = s
            .append_message(NewMessage {
                conversation_id: c.id.clone(),
                sender: "Ego".to_string(),
                text: "reply".to_string(),
                kind: MessageKind::Agent,
                valence: Some(0.5),
                arousal: Some(0.1),
                turn_id: Some(user.id.clone()),
            })
            .await
            .unwrap();
        assert_eq!(reply.turn_id, user.id);

        let history = s.messages(&c.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, MessageKind::User);
        assert_eq!(history[1].valence, Some(0.5));

        let listed = s.list_conversations().await.unwrap();
        assert_eq!(listed[0].preview.chars().count(), PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn test_message_requires_existing_conversation() {
        let s = store(4);
        assert!(s.append_message(user_message("nope", "hi")).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_rejects_wrong_dimension() {
        let s = store(3);
        let err = s
            .insert_memory(memory("Id", "text", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(s
            .list_memories("Id", MemorySort::Timestamp, SortOrder::Desc)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_nearest_and_recall_bookkeeping() {
        let s = store(3);
        let a = s.insert_memory(memory("Id", "a", vec![1.0, 0.0, 0.0])).await.unwrap();
        let b = s.insert_memory(memory("Id", "b", vec![0.6, 0.8, 0.0])).await.unwrap();
        s.insert_memory(memory("Ego", "c", vec![1.0, 0.0, 0.0])).await.unwrap();

        let hits = s.nearest_memories("Id", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, a);
        assert_eq!(hits[1].record.id, b);
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits[0].record.embedding, vec![1.0, 0.0, 0.0]);

        s.record_recall(&[b]).await.unwrap();
        s.record_recall(&[b]).await.unwrap();
        let by_recall = s
            .list_memories("Id", MemorySort::RecallCount, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(by_recall[0].id, b);
        assert_eq!(by_recall[0].recall_count, 2);
        assert!(by_recall[0].last_recalled_at.is_some());
        assert_eq!(by_recall[1].recall_count, 0);
    }

    #[tokio::test]
    async fn test_clear_all_empties_everything() {
        let s = store(2);
        let c = s.create_conversation().await.unwrap();
        s.append_message(user_message(&c.id, "hello")).await.unwrap();
        s.insert_memory(memory("Id", "a", vec![1.0, 0.0])).await.unwrap();

        let summary = s.clear_all().await.unwrap();
        assert_eq!(
            summary,
            ClearSummary {
                messages: 1,
                conversations: 1,
                memories: 1
            }
        );
        assert!(s.nearest_memories("Id", &[1.0, 0.0], 3).await.unwrap().is_empty());
        assert!(s.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("theatre.db");
        {
            let s = SqliteStore::open(&path, 2, &MemorySection::default()).unwrap();
            s.insert_memory(memory("Superego", "kept", vec![0.0, 1.0]))
                .await
                .unwrap();
        }
        let s = SqliteStore::open(&path, 2, &MemorySection::default()).unwrap();
        let hits = s.nearest_memories("Superego", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "kept");
    }
}
