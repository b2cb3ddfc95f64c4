//! 核心编排层：领域类型、情绪评分、合成者、记忆写入任务组、回合编排与错误分类

pub mod affect;
pub mod error;
pub mod orchestrator;
pub mod synthesizer;
pub mod task_group;
pub mod types;

pub use affect::{parse_affect, AffectScorer, AFFECT_PROMPT_MARKER};
pub use error::TurnError;
pub use orchestrator::{TurnOrchestrator, TurnReport, TurnSettings, USER_SENDER};
pub use synthesizer::{assess, AgentMentions, SynthesisOutcome, SynthesisState, Sufficiency, Synthesizer, MAX_DEPTH};
pub use task_group::{MemoryWriteGroup, WriteSummary};
pub use types::{
    Affect, AgentIdentity, AgentResponse, ConversationTurn, SynthesiserIdentity,
    SynthesizedResponse, PSYCHE_COLOR, PSYCHE_NAME,
};
