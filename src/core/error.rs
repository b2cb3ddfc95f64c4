//! 回合错误分类
//!
//! 只有会话不存在、用户消息无法落库与合成失败会终结整个回合；
//! 单个 Agent 的失败只影响它自己（agent_error）。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::StoreError;

#[derive(Error, Debug)]
pub enum TurnError {
    /// 未知会话：在任何 Agent 工作开始前终止
    #[error("Conversation not found: {0}")]
    UnknownConversation(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// 单个 Agent 流水线失败（补全或持久化）
    #[error("{agent} failed: {reason}")]
    AgentPipeline { agent: String, reason: String },

    #[error("Synthesis failed: {0}")]
    Synthesis(LlmError),

    #[error("Turn task panicked: {0}")]
    Panicked(String),
}

impl TurnError {
    pub fn agent(agent: &str, reason: impl ToString) -> Self {
        Self::AgentPipeline {
            agent: agent.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 是否应以终止性 `error` 事件结束回合
    pub fn is_turn_fatal(&self) -> bool {
        !matches!(self, Self::AgentPipeline { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_agent_failures_are_local() {
        assert!(!TurnError::agent("Id", "timeout").is_turn_fatal());
        assert!(TurnError::UnknownConversation("x".into()).is_turn_fatal());
        assert!(TurnError::Synthesis(LlmError::EmptyResponse).is_turn_fatal());
        assert_eq!(
            TurnError::agent("Ego", "empty response").to_string(),
            "Ego failed: empty response"
        );
    }
}
