//! 领域类型：Agent 身份、回复、合成结果与回合

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::GenerationParams;

/// 合成者在消息与记忆中使用的名字
pub const PSYCHE_NAME: &str = "Psyche";

pub const PSYCHE_COLOR: &str = "magenta";

/// Agent 身份（加载后不可变）；name 为唯一键
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentIdentity {
    pub name: String,
    pub system_prompt: String,
    pub params: GenerationParams,
    pub color: String,
}

/// 合成者的固定系统提示与生成参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesiserIdentity {
    pub prompt: String,
    pub params: GenerationParams,
}

/// 情绪值：valence ∈ [-1, 1]，arousal ∈ [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affect {
    pub valence: f32,
    pub arousal: f32,
}

impl Affect {
    /// 构造时截断到合法区间
    pub fn clamped(valence: f32, arousal: f32) -> Self {
        Self {
            valence: valence.clamp(-1.0, 1.0),
            arousal: arousal.clamp(0.0, 1.0),
        }
    }
}

/// 单个 Agent 在一个回合中的回复；每回合每 Agent 至多一条
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub agent: String,
    pub text: String,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedResponse {
    pub text: String,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
    /// 所结束回合的 id（开启回合的用户消息 id）
    pub turn_id: String,
}

/// 一个完整回合
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub conversation_id: String,
    pub utterance: String,
    pub timestamp: DateTime<Utc>,
    pub responses: Vec<AgentResponse>,
    pub synthesized: Option<SynthesizedResponse>,
}
