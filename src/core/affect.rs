//! 情绪评分：一次辅助补全调用，要求模型只返回 {"valence", "arousal"} JSON
//!
//! 任一环节失败（调用失败、解析失败、缺字段、非数值）都得到 None，不影响回合。

use std::sync::Arc;

use serde_json::Value;

use crate::core::types::Affect;
use crate::llm::{GenerationParams, LlmClient};
use crate::memory::Message;

/// 评分提示的固定开头，测试替身据此识别评分请求
pub const AFFECT_PROMPT_MARKER: &str = "You are an emotion rater.";

fn affect_prompt(text: &str) -> String {
    format!(
        "{AFFECT_PROMPT_MARKER} Given the following text, rate its emotional valence and arousal. \
         Valence is a float from -1 (very negative) to 1 (very positive), 0 is neutral. \
         Arousal is a float from 0 (very calm) to 1 (very excited). \
         Reply ONLY with a JSON object in the format: {{\"valence\": <float>, \"arousal\": <float>}}\n\n\
         Text: {text}\nJSON:"
    )
}

/// 取第一个 '{' 到最后一个 '}' 之间的子串
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// 数值或数值字符串；NaN 与无穷视为非数值
fn numeric(value: &Value) -> Option<f32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n as f32)
}

/// 解析模型输出并截断到合法区间
pub fn parse_affect(raw: &str) -> Option<Affect> {
    let json = extract_json_object(raw)?;
    let value: Value = serde_json::from_str(json).ok()?;
    let valence = numeric(value.get("valence")?)?;
    let arousal = numeric(value.get("arousal")?)?;
    Some(Affect::clamped(valence, arousal))
}

pub struct AffectScorer {
    llm: Arc<dyn LlmClient>,
    params: GenerationParams,
}

impl AffectScorer {
    pub fn new(llm: Arc<dyn LlmClient>, params: GenerationParams) -> Self {
        Self { llm, params }
    }

    pub async fn score(&self, text: &str) -> Option<Affect> {
        let messages = [Message::user(affect_prompt(text))];
        let raw = match self.llm.complete(&messages, &self.params).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("affect scoring failed: {}", e);
                return None;
            }
        };
        let affect = parse_affect(&raw);
        if affect.is_none() {
            tracing::warn!("affect scoring: unparseable reply {:?}", raw);
        }
        affect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_extracts_from_surrounding_prose() {
        let a = parse_affect("Sure! {\"valence\": 0.4, \"arousal\": 0.7} hope that helps").unwrap();
        assert!((a.valence - 0.4).abs() < 1e-6);
        assert!((a.arousal - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_parse_clamps_and_accepts_numeric_strings() {
        let a = parse_affect(r#"{"valence": "-3", "arousal": 1.5}"#).unwrap();
        assert_eq!(a.valence, -1.0);
        assert_eq!(a.arousal, 1.0);
        let b = parse_affect(r#"{"valence": 0.2, "arousal": -0.5}"#).unwrap();
        assert_eq!(b.arousal, 0.0);
    }

    #[test]
    fn test_parse_failures_yield_none() {
        assert!(parse_affect("no json here").is_none());
        assert!(parse_affect(r#"{"valence": 0.1}"#).is_none());
        assert!(parse_affect(r#"{"valence": "high", "arousal": 0.2}"#).is_none());
        assert!(parse_affect(r#"{"valence": "NaN", "arousal": 0.2}"#).is_none());
        assert!(parse_affect(r#"{"valence": null, "arousal": 0.2}"#).is_none());
        assert!(parse_affect("} backwards {").is_none());
    }

    #[tokio::test]
    async fn test_score_is_soft_on_llm_failure() {
        let llm = Arc::new(ScriptedLlmClient::new().fail_on(AFFECT_PROMPT_MARKER, "down"));
        let scorer = AffectScorer::new(llm, GenerationParams::default());
        assert!(scorer.score("I am furious").await.is_none());
    }

    #[tokio::test]
    async fn test_score_sends_text_in_prompt() {
        let llm = Arc::new(
            ScriptedLlmClient::new().on(AFFECT_PROMPT_MARKER, r#"{"valence": -0.5, "arousal": 0.9}"#),
        );
        let scorer = AffectScorer::new(llm.clone(), GenerationParams::default());
        let a = scorer.score("I am furious").await.unwrap();
        assert_eq!(a, Affect { valence: -0.5, arousal: 0.9 });
        assert!(llm.calls()[0][0].content.contains("Text: I am furious"));
    }
}
