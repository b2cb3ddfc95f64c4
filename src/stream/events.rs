//! 回合事件与线协议帧：`event: <name>\ndata: <JSON>\n\n`

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{AgentResponse, PSYCHE_NAME};
use crate::memory::StoredMessage;

pub const DONE_MESSAGE: &str = "Stream complete";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    UserMessage {
        id: String,
        conversation_id: String,
        text: String,
        created_at: DateTime<Utc>,
    },
    AgentUpdate {
        name: String,
        reply: String,
        color: String,
        valence: Option<f32>,
        arousal: Option<f32>,
        message_id: String,
    },
    AgentError {
        name: String,
        error: String,
    },
    PsycheResponse {
        name: String,
        reply: String,
        color: String,
        valence: Option<f32>,
        arousal: Option<f32>,
        message_id: Option<String>,
    },
    Error {
        message: String,
    },
    Done {
        message: String,
    },
}

impl TurnEvent {
    pub fn user_message(msg: &StoredMessage) -> Self {
        Self::UserMessage {
            id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            text: msg.text.clone(),
            created_at: msg.created_at,
        }
    }

    pub fn agent_update(resp: &AgentResponse, message_id: &str) -> Self {
        Self::AgentUpdate {
            name: resp.agent.clone(),
            reply: resp.text.clone(),
            color: resp.color.clone(),
            valence: resp.valence,
            arousal: resp.arousal,
            message_id: message_id.to_string(),
        }
    }

    pub fn agent_error(name: impl Into<String>, error: impl ToString) -> Self {
        Self::AgentError {
            name: name.into(),
            error: error.to_string(),
        }
    }

    pub fn psyche_response(
        reply: impl Into<String>,
        color: impl Into<String>,
        valence: Option<f32>,
        arousal: Option<f32>,
        message_id: Option<String>,
    ) -> Self {
        Self::PsycheResponse {
            name: PSYCHE_NAME.to_string(),
            reply: reply.into(),
            color: color.into(),
            valence,
            arousal,
            message_id,
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    pub fn done() -> Self {
        Self::Done {
            message: DONE_MESSAGE.to_string(),
        }
    }

    /// 事件名（即 `event:` 行）
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::AgentUpdate { .. } => "agent_update",
            Self::AgentError { .. } => "agent_error",
            Self::PsycheResponse { .. } => "psyche_response",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// 编码为一帧
    pub fn frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        });
        format!("event: {}\ndata: {}\n\n", self.name(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = TurnEvent::done().frame();
        assert_eq!(
            frame,
            "event: done\ndata: {\"type\":\"done\",\"message\":\"Stream complete\"}\n\n"
        );
    }

    #[test]
    fn test_agent_error_payload() {
        let frame = TurnEvent::agent_error("Id", "request timed out after 60s").frame();
        let (head, rest) = frame.split_once('\n').unwrap();
        assert_eq!(head, "event: agent_error");
        let json: serde_json::Value =
            serde_json::from_str(rest.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(json["type"], "agent_error");
        assert_eq!(json["name"], "Id");
        assert!(frame.ends_with("\n\n"));
    }
}
