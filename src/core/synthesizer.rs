//! 合成者：把各 Agent 的回复收敛为一个第一人称回复
//!
//! 状态机 Drafting → Evaluating →（Refining → Evaluating）* → Done。
//! Evaluating 用一个简单的充分性启发式判断草稿是否仍像「多声部列表」，
//! 最多精炼 MAX_DEPTH 次；情绪评分只对最终草稿做一次。

use std::sync::Arc;

use regex::Regex;

use crate::core::affect::AffectScorer;
use crate::core::types::{AgentResponse, SynthesiserIdentity};
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

pub const MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisState {
    Drafting,
    Evaluating { draft: String, depth: usize },
    Refining { draft: String, depth: usize },
    Done { draft: String, depth: usize },
}

/// 充分性指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sufficiency {
    pub bullets: usize,
    pub numbered: usize,
    pub agent_mentions: usize,
}

impl Sufficiency {
    pub fn is_sufficient(&self) -> bool {
        self.bullets <= 1 && self.numbered == 0 && self.agent_mentions <= 1
    }
}

fn is_bullet_line(line: &str) -> bool {
    let mut chars = line.trim_start().chars();
    matches!(chars.next(), Some('-' | '*' | '•')) && chars.next().is_some_and(char::is_whitespace)
}

fn is_numbered_line(line: &str) -> bool {
    let rest = line.trim_start();
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let mut chars = rest[digits..].chars();
    matches!(chars.next(), Some('.' | ')')) && chars.next().is_some_and(char::is_whitespace)
}

/// 名册中各 Agent 名字的整词匹配器，构造时编译一次
///
/// 名字两侧须为非单词字符或文本边界，大小写不敏感；名字中的标点按字面匹配。
#[derive(Debug, Clone)]
pub struct AgentMentions {
    patterns: Vec<Regex>,
}

impl AgentMentions {
    pub fn new(agent_names: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(agent_names.len());
        for name in agent_names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let pattern = format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(name));
            match Regex::new(&pattern) {
                Ok(re) => patterns.push(re),
                Err(e) => tracing::warn!("agent name {:?} not matchable in drafts: {}", name, e),
            }
        }
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 草稿中提到的不同 Agent 数
    pub fn count(&self, draft: &str) -> usize {
        self.patterns
            .iter()
            .filter(|re| re.is_match(draft))
            .count()
    }
}

pub fn assess(draft: &str, mentions: &AgentMentions) -> Sufficiency {
    let bullets = draft.lines().filter(|l| is_bullet_line(l)).count();
    let numbered = draft.lines().filter(|l| is_numbered_line(l)).count();
    Sufficiency {
        bullets,
        numbered,
        agent_mentions: mentions.count(draft),
    }
}

/// 合成结果（未含回合 id）
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub text: String,
    pub depth: usize,
    pub valence: Option<f32>,
    pub arousal: Option<f32>,
}

pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    identity: SynthesiserIdentity,
    mentions: AgentMentions,
    affect: Arc<AffectScorer>,
}

impl Synthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        identity: SynthesiserIdentity,
        agent_names: Vec<String>,
        affect: Arc<AffectScorer>,
    ) -> Self {
        Self {
            llm,
            identity,
            mentions: AgentMentions::new(&agent_names),
            affect,
        }
    }

    fn draft_messages(&self, utterance: &str, replies: &[AgentResponse]) -> Vec<Message> {
        let mut context = format!("User: {}\n\n", utterance);
        if replies.is_empty() {
            context.push_str("(No inner voice answered this time. Reply to the user directly.)");
        } else {
            context.push_str("Inner voices:");
            for r in replies {
                context.push_str(&format!("\n{}: {}", r.agent, r.text));
            }
        }
        vec![Message::system(&self.identity.prompt), Message::user(context)]
    }

    fn refine_messages(&self, utterance: &str, draft: &str) -> Vec<Message> {
        let context = format!(
            "User: {utterance}\n\n\
             Previous draft:\n{draft}\n\n\
             Rewrite the draft as one integrated first-person voice answering the user. \
             Do not name or list the inner voices and do not use bullet points or numbered lists."
        );
        vec![Message::system(&self.identity.prompt), Message::user(context)]
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let text = self.llm.complete(messages, &self.identity.params).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// 推进一步；Done 状态原样返回
    pub async fn step(
        &self,
        state: SynthesisState,
        utterance: &str,
        replies: &[AgentResponse],
    ) -> Result<SynthesisState, LlmError> {
        match state {
            SynthesisState::Drafting => {
                let draft = self.complete(&self.draft_messages(utterance, replies)).await?;
                Ok(SynthesisState::Evaluating { draft, depth: 0 })
            }
            SynthesisState::Evaluating { draft, depth } => {
                let s = assess(&draft, &self.mentions);
                tracing::debug!(
                    "synthesis depth {}: bullets={} numbered={} mentions={}",
                    depth,
                    s.bullets,
                    s.numbered,
                    s.agent_mentions
                );
                if s.is_sufficient() || depth >= MAX_DEPTH {
                    Ok(SynthesisState::Done { draft, depth })
                } else {
                    Ok(SynthesisState::Refining { draft, depth })
                }
            }
            SynthesisState::Refining { draft, depth } => {
                let refined = self.complete(&self.refine_messages(utterance, &draft)).await?;
                Ok(SynthesisState::Evaluating {
                    draft: refined,
                    depth: depth + 1,
                })
            }
            done @ SynthesisState::Done { .. } => Ok(done),
        }
    }

    /// 运行到 Done，再对最终草稿评分一次
    pub async fn run(
        &self,
        utterance: &str,
        replies: &[AgentResponse],
    ) -> Result<SynthesisOutcome, LlmError> {
        let mut state = SynthesisState::Drafting;
        let (text, depth) = loop {
            state = self.step(state, utterance, replies).await?;
            if let SynthesisState::Done { draft, depth } = state {
                break (draft, depth);
            }
        };
        let affect = self.affect.score(&text).await;
        Ok(SynthesisOutcome {
            text,
            depth,
            valence: affect.map(|a| a.valence),
            arousal: affect.map(|a| a.arousal),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::affect::AFFECT_PROMPT_MARKER;
    use crate::llm::{GenerationParams, ScriptedLlmClient};

    fn names() -> Vec<String> {
        vec!["Id".into(), "Ego".into(), "Superego".into()]
    }

    fn roster_mentions() -> AgentMentions {
        AgentMentions::new(&names())
    }

    fn reply(agent: &str, text: &str) -> AgentResponse {
        AgentResponse {
            agent: agent.into(),
            text: text.into(),
            valence: None,
            arousal: None,
            color: "grey".into(),
            created_at: chrono::Utc::now(),
        }
    }

    fn synthesizer(llm: Arc<ScriptedLlmClient>) -> Synthesizer {
        let affect = Arc::new(AffectScorer::new(llm.clone(), GenerationParams::default()));
        Synthesizer::new(
            llm,
            SynthesiserIdentity {
                prompt: "You are the Psyche.".into(),
                params: GenerationParams::default(),
            },
            names(),
            affect,
        )
    }

    const LIST_DRAFT: &str = "- Id wants it now\n- Ego says wait\n- Superego says no";
    const FLOWING: &str = "I want to rest, but I know I should finish what I started first.";

    #[test]
    fn test_three_bullet_draft_is_insufficient() {
        let s = assess(LIST_DRAFT, &roster_mentions());
        assert_eq!(s.bullets, 3);
        assert_eq!(s.agent_mentions, 3);
        assert!(!s.is_sufficient());
    }

    #[test]
    fn test_flowing_paragraph_is_sufficient() {
        let s = assess(FLOWING, &roster_mentions());
        assert_eq!(s, Sufficiency { bullets: 0, numbered: 0, agent_mentions: 0 });
        assert!(s.is_sufficient());
    }

    #[test]
    fn test_markers_and_whole_word_names() {
        let s = assess("1. first\n2) second\n• third\n*emphasis* stays", &roster_mentions());
        assert_eq!(s.numbered, 2);
        assert_eq!(s.bullets, 1);
        // "Egotistic" / "idea" 不算提及
        let s = assess("An egotistic idea, said the ego.", &roster_mentions());
        assert_eq!(s.agent_mentions, 1);
        let punct = AgentMentions::new(&["Eros (Life Drive)".to_string()]);
        assert_eq!(assess("As Eros (Life Drive) said", &punct).agent_mentions, 1);
    }

    #[test]
    fn test_mention_patterns_compiled_once_per_named_agent() {
        let mentions = AgentMentions::new(&[
            "Id".to_string(),
            "  ".to_string(),
            "objet petit a".to_string(),
            "C++ (Critic)".to_string(),
        ]);
        assert_eq!(mentions.len(), 3);
        // 同一匹配器可反复使用
        for _ in 0..3 {
            assert_eq!(mentions.count("the id and the C++ (critic) disagree"), 2);
            assert_eq!(mentions.count("nothing relevant here"), 0);
        }
        assert!(AgentMentions::new(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_sufficient_draft_finishes_without_refining() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on(AFFECT_PROMPT_MARKER, r#"{"valence": 0.3, "arousal": 0.2}"#)
                .on("Inner voices:", FLOWING),
        );
        let out = synthesizer(llm.clone())
            .run("Should I rest?", &[reply("Id", "Sleep!"), reply("Ego", "Finish first.")])
            .await
            .unwrap();
        assert_eq!(out.text, FLOWING);
        assert_eq!(out.depth, 0);
        assert_eq!(out.valence, Some(0.3));
        let affect_calls = llm
            .calls()
            .iter()
            .filter(|c| c.iter().any(|m| m.content.contains(AFFECT_PROMPT_MARKER)))
            .count();
        assert_eq!(affect_calls, 1);
    }

    #[tokio::test]
    async fn test_single_refinement_step_drops_agent_lines() {
        let llm = Arc::new(ScriptedLlmClient::new().on("Previous draft:", FLOWING));
        let synth = synthesizer(llm.clone());
        let replies = [reply("Id", "Sleep!")];
        let next = synth
            .step(
                SynthesisState::Refining {
                    draft: LIST_DRAFT.into(),
                    depth: 0,
                },
                "Should I rest?",
                &replies,
            )
            .await
            .unwrap();
        assert_eq!(
            next,
            SynthesisState::Evaluating {
                draft: FLOWING.into(),
                depth: 1
            }
        );
        let sent = &llm.calls()[0];
        assert!(sent[1].content.contains("Should I rest?"));
        assert!(!sent[1].content.contains("Id: Sleep!"));
    }

    #[tokio::test]
    async fn test_refinement_stops_at_max_depth() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .on(AFFECT_PROMPT_MARKER, "not json")
                .on("Previous draft:", LIST_DRAFT)
                .on("Inner voices:", LIST_DRAFT),
        );
        let out = synthesizer(llm.clone())
            .run("Should I rest?", &[reply("Id", "Sleep!")])
            .await
            .unwrap();
        assert_eq!(out.depth, MAX_DEPTH);
        assert_eq!(out.text, LIST_DRAFT);
        assert!(out.valence.is_none());
        // 1 次起草 + 2 次精炼 + 1 次评分
        assert_eq!(llm.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_and_empty_replies() {
        let llm = Arc::new(ScriptedLlmClient::new().fail_on("User:", "down"));
        assert!(synthesizer(llm).run("hi", &[]).await.is_err());

        let llm = Arc::new(ScriptedLlmClient::new().on("No inner voice answered", FLOWING));
        let out = synthesizer(llm).run("hi", &[]).await.unwrap();
        assert_eq!(out.text, FLOWING);
    }
}
