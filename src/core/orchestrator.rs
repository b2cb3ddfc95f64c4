//! 回合编排：每个 Agent 一条独立流水线，全部结束后交给合成者
//!
//! 单条流水线：检索情景记忆 → 组装上下文 → 补全 → 情绪评分 → 落库 → 分离记忆写入 → 发出 agent_update。
//! 任一步失败只发 agent_error 并结束该流水线；检索与评分失败降级为空/None。
//! 回合在所有记忆写入结束后才返回，调用方据此发出 done。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Roster;
use crate::core::affect::AffectScorer;
use crate::core::error::TurnError;
use crate::core::synthesizer::Synthesizer;
use crate::core::task_group::{MemoryWriteGroup, WriteSummary};
use crate::core::types::{
    AgentIdentity, AgentResponse, ConversationTurn, SynthesizedResponse, PSYCHE_COLOR,
    PSYCHE_NAME,
};
use crate::llm::{GenerationParams, LlmClient, LlmError};
use crate::memory::{
    render_recollections, ClearSummary, EpisodicMemory, Message, MessageKind, NewMessage, Store,
    StoreError, StoredMessage, WorkingMemory, MAX_RECOLLECTIONS,
};
use crate::stream::{EventSink, TurnEvent};

/// 用户消息在消息表中的发送者
pub const USER_SENDER: &str = "User";

/// 回合结果：回合内容 + 记忆写入统计
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn: ConversationTurn,
    pub writes: WriteSummary,
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// 每个 Agent 每回合检索的记忆条数，超过 MAX_RECOLLECTIONS 时按上限处理
    pub retrieve_k: usize,
    /// 情绪评分调用的生成参数
    pub affect_params: GenerationParams,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            retrieve_k: 3,
            affect_params: GenerationParams::default().temperature(0.0),
        }
    }
}

struct TurnContext {
    conversation_id: String,
    turn_id: String,
    utterance: String,
}

pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn Store>,
    episodic: Arc<EpisodicMemory>,
    working: Arc<WorkingMemory>,
    affect: Arc<AffectScorer>,
    synthesizer: Synthesizer,
    agents: Vec<AgentIdentity>,
    retrieve_k: usize,
}

/// 从持久化消息还原某 Agent 的 (user, reply) 历史，跳过当前回合
fn exchanges_for(agent: &str, messages: &[StoredMessage], current_turn: &str) -> Vec<(String, String)> {
    let mut prompts: HashMap<&str, &str> = HashMap::new();
    let mut out = Vec::new();
    for m in messages {
        if m.turn_id == current_turn {
            continue;
        }
        match m.kind {
            MessageKind::User => {
                prompts.insert(m.id.as_str(), m.text.as_str());
            }
            MessageKind::Agent if m.sender == agent => {
                if let Some(prompt) = prompts.get(m.turn_id.as_str()) {
                    out.push((prompt.to_string(), m.text.clone()));
                }
            }
            _ => {}
        }
    }
    out
}

impl TurnOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn Store>,
        episodic: Arc<EpisodicMemory>,
        working: Arc<WorkingMemory>,
        roster: &Roster,
        settings: TurnSettings,
    ) -> Self {
        let retrieve_k = settings.retrieve_k.min(MAX_RECOLLECTIONS);
        if retrieve_k < settings.retrieve_k {
            tracing::warn!(
                "retrieve_k {} exceeds the recollection limit, using {}",
                settings.retrieve_k,
                retrieve_k
            );
        }
        let affect = Arc::new(AffectScorer::new(llm.clone(), settings.affect_params));
        let synthesizer = Synthesizer::new(
            llm.clone(),
            roster.synthesiser.clone(),
            roster.agent_names(),
            affect.clone(),
        );
        Self {
            llm,
            store,
            episodic,
            working,
            affect,
            synthesizer,
            agents: roster.agents.clone(),
            retrieve_k,
        }
    }

    pub fn agents(&self) -> &[AgentIdentity] {
        &self.agents
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn episodic(&self) -> &Arc<EpisodicMemory> {
        &self.episodic
    }

    /// 清空全部会话、消息、记忆以及进程内工作记忆
    pub async fn clear_all(&self) -> Result<ClearSummary, StoreError> {
        let summary = self.store.clear_all().await?;
        self.working.clear();
        tracing::info!(
            "cleared {} messages, {} conversations, {} memories",
            summary.messages,
            summary.conversations,
            summary.memories
        );
        Ok(summary)
    }

    /// 运行一个回合；返回前等待本回合全部记忆写入结束
    ///
    /// 写入任务组由调用方持有：即使本回合的 future 中途被丢弃（panic），
    /// 已分离的写入也不会随之中止，调用方可以再次 `join_all`。
    pub async fn run_turn(
        self: &Arc<Self>,
        conversation_id: &str,
        utterance: &str,
        sink: &EventSink,
        group: &Arc<MemoryWriteGroup>,
    ) -> Result<TurnReport, TurnError> {
        let result = self.drive(conversation_id, utterance, sink, group).await;

        let writes = group.join_all().await;
        tracing::info!(
            "turn in {}: memory writes written={} skipped={} failed={}",
            conversation_id,
            writes.written,
            writes.skipped,
            writes.failed
        );
        let (prompt, completion, total) = self.llm.token_usage();
        tracing::debug!(
            "token usage so far: prompt={} completion={} total={}",
            prompt,
            completion,
            total
        );

        result.map(|turn| TurnReport { turn, writes })
    }

    async fn drive(
        self: &Arc<Self>,
        conversation_id: &str,
        utterance: &str,
        sink: &EventSink,
        group: &Arc<MemoryWriteGroup>,
    ) -> Result<ConversationTurn, TurnError> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(TurnError::UnknownConversation(conversation_id.to_string()));
        }

        let user = self
            .store
            .append_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                sender: USER_SENDER.to_string(),
                text: utterance.to_string(),
                kind: MessageKind::User,
                valence: None,
                arousal: None,
                turn_id: None,
            })
            .await?;
        sink.emit(TurnEvent::user_message(&user));

        let ctx = Arc::new(TurnContext {
            conversation_id: conversation_id.to_string(),
            turn_id: user.id.clone(),
            utterance: utterance.to_string(),
        });

        let mut handles = Vec::with_capacity(self.agents.len());
        for agent in self.agents.iter().cloned() {
            let this = Arc::clone(self);
            let ctx = Arc::clone(&ctx);
            let sink = sink.clone();
            let group = Arc::clone(group);
            let name = agent.name.clone();
            let handle =
                tokio::spawn(async move { this.run_agent(agent, &ctx, &sink, &group).await });
            handles.push((name, handle));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(Some(resp)) => responses.push(resp),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("pipeline for {} aborted: {}", name, e);
                    sink.emit(TurnEvent::agent_error(&name, format!("pipeline aborted: {e}")));
                }
            }
        }
        tracing::debug!(
            "{}/{} agents replied, synthesising",
            responses.len(),
            self.agents.len()
        );

        let outcome = self
            .synthesizer
            .run(&ctx.utterance, &responses)
            .await
            .map_err(TurnError::Synthesis)?;

        let message_id = match self
            .store
            .append_message(NewMessage {
                conversation_id: ctx.conversation_id.clone(),
                sender: PSYCHE_NAME.to_string(),
                text: outcome.text.clone(),
                kind: MessageKind::Psyche,
                valence: outcome.valence,
                arousal: outcome.arousal,
                turn_id: Some(ctx.turn_id.clone()),
            })
            .await
        {
            Ok(stored) => Some(stored.id),
            Err(e) => {
                tracing::warn!("failed to persist psyche reply: {}", e);
                None
            }
        };
        sink.emit(TurnEvent::psyche_response(
            &outcome.text,
            PSYCHE_COLOR,
            outcome.valence,
            outcome.arousal,
            message_id,
        ));

        let episodic = Arc::clone(&self.episodic);
        let (text, prompt) = (outcome.text.clone(), ctx.utterance.clone());
        let (valence, arousal) = (outcome.valence, outcome.arousal);
        group.spawn(PSYCHE_NAME, async move {
            episodic
                .write(PSYCHE_NAME, &text, valence, arousal, Some(&prompt))
                .await
        });

        Ok(ConversationTurn {
            turn_id: ctx.turn_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            utterance: ctx.utterance.clone(),
            timestamp: user.created_at,
            responses,
            synthesized: Some(SynthesizedResponse {
                text: outcome.text,
                valence: outcome.valence,
                arousal: outcome.arousal,
                turn_id: ctx.turn_id.clone(),
            }),
        })
    }

    async fn run_agent(
        &self,
        agent: AgentIdentity,
        ctx: &TurnContext,
        sink: &EventSink,
        group: &MemoryWriteGroup,
    ) -> Option<AgentResponse> {
        match self.agent_pipeline(&agent, ctx, group).await {
            Ok((resp, message_id)) => {
                sink.emit(TurnEvent::agent_update(&resp, &message_id));
                Some(resp)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                let reason = match e {
                    TurnError::AgentPipeline { reason, .. } => reason,
                    other => other.to_string(),
                };
                sink.emit(TurnEvent::agent_error(&agent.name, reason));
                None
            }
        }
    }

    async fn agent_pipeline(
        &self,
        agent: &AgentIdentity,
        ctx: &TurnContext,
        group: &MemoryWriteGroup,
    ) -> Result<(AgentResponse, String), TurnError> {
        let memories = self
            .episodic
            .retrieve(&agent.name, &ctx.utterance, self.retrieve_k)
            .await;
        let window = self.window_for(&agent.name, ctx).await;

        let mut messages = Vec::with_capacity(window.len() + 3);
        messages.push(Message::system(&agent.system_prompt));
        messages.extend(render_recollections(&agent.name, &memories));
        messages.extend(window);
        messages.push(Message::user(&ctx.utterance));
        tracing::debug!(
            "{}: {} recollection(s), {} context message(s)",
            agent.name,
            memories.len(),
            messages.len()
        );

        let reply = self
            .llm
            .complete(&messages, &agent.params)
            .await
            .map_err(|e| TurnError::agent(&agent.name, e))?;
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(TurnError::agent(&agent.name, LlmError::EmptyResponse));
        }

        let affect = self.affect.score(&reply).await;
        let (valence, arousal) = (affect.map(|a| a.valence), affect.map(|a| a.arousal));

        let stored = self
            .store
            .append_message(NewMessage {
                conversation_id: ctx.conversation_id.clone(),
                sender: agent.name.clone(),
                text: reply.clone(),
                kind: MessageKind::Agent,
                valence,
                arousal,
                turn_id: Some(ctx.turn_id.clone()),
            })
            .await
            .map_err(|e| TurnError::agent(&agent.name, e))?;

        let episodic = Arc::clone(&self.episodic);
        let (name, text, prompt) = (agent.name.clone(), reply.clone(), ctx.utterance.clone());
        group.spawn(agent.name.clone(), async move {
            episodic
                .write(&name, &text, valence, arousal, Some(&prompt))
                .await
        });

        self.working
            .record_exchange(&agent.name, &ctx.conversation_id, &ctx.utterance, &reply);

        Ok((
            AgentResponse {
                agent: agent.name.clone(),
                text: reply,
                valence,
                arousal,
                color: agent.color.clone(),
                created_at: Utc::now(),
            },
            stored.id,
        ))
    }

    /// 工作记忆窗口；进程内未缓存时从持久化消息回填
    async fn window_for(&self, agent: &str, ctx: &TurnContext) -> Vec<Message> {
        if let Some(window) = self.working.snapshot(agent, &ctx.conversation_id) {
            return window;
        }
        let history = match self.store.messages(&ctx.conversation_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("{}: could not load history for working memory: {}", agent, e);
                Vec::new()
            }
        };
        let exchanges = exchanges_for(agent, &history, &ctx.turn_id);
        self.working.hydrate(agent, &ctx.conversation_id, exchanges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, sender: &str, kind: MessageKind, turn: &str, text: &str) -> StoredMessage {
        StoredMessage {
            id: id.into(),
            conversation_id: "c".into(),
            sender: sender.into(),
            text: text.into(),
            kind,
            valence: None,
            arousal: None,
            turn_id: turn.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_exchanges_skip_current_turn_and_other_agents() {
        let history = vec![
            msg("u1", USER_SENDER, MessageKind::User, "u1", "first"),
            msg("a1", "Id", MessageKind::Agent, "u1", "id-1"),
            msg("a2", "Ego", MessageKind::Agent, "u1", "ego-1"),
            msg("p1", PSYCHE_NAME, MessageKind::Psyche, "u1", "psyche-1"),
            msg("u2", USER_SENDER, MessageKind::User, "u2", "second"),
            msg("a3", "Ego", MessageKind::Agent, "u2", "ego-2"),
            msg("u3", USER_SENDER, MessageKind::User, "u3", "current"),
        ];
        assert_eq!(
            exchanges_for("Ego", &history, "u3"),
            vec![
                ("first".to_string(), "ego-1".to_string()),
                ("second".to_string(), "ego-2".to_string())
            ]
        );
        assert_eq!(
            exchanges_for("Id", &history, "u1"),
            Vec::<(String, String)>::new()
        );
    }
}
