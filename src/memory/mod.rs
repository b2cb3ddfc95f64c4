//! 记忆层：工作记忆窗口（短期）、情景记忆（向量检索）、持久化

pub mod ann;
pub mod episodic;
pub mod message;
pub mod store;
pub mod working;

pub use ann::{cosine_distance, AnnHit, AnnIndex};
pub use episodic::{
    render_recollections, should_write_memory, should_write_memory_for, EpisodicMemory,
    MemoryError, WriteOutcome, MAX_RECOLLECTIONS,
};
pub use message::{Message, Role};
pub use store::{
    ClearSummary, Conversation, ConversationSummary, MemoryRecord, MemorySort, MessageKind,
    NewMemory, NewMessage, ScoredMemory, SortOrder, SqliteStore, Store, StoreError,
    StoredMessage,
};
pub use working::{WorkingMemory, WorkingMemoryWindow};
