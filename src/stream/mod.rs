//! 回合事件流：把编排器包装为有序事件序列
//!
//! user_message → agent_update / agent_error（每个 Agent 一条）→ psyche_response →（可选）error → done。
//! 回合在独立任务上运行；消费端断开不会中止回合。

pub mod events;
pub mod sink;

use std::sync::Arc;

use futures_util::stream::{self, Stream};

pub use events::{TurnEvent, DONE_MESSAGE};
pub use sink::EventSink;

use crate::core::{MemoryWriteGroup, TurnError, TurnOrchestrator};

pub struct TurnStream;

impl TurnStream {
    /// 启动一个回合并返回其事件流；流以 done 结束
    pub fn start(
        orchestrator: Arc<TurnOrchestrator>,
        conversation_id: impl Into<String>,
        utterance: impl Into<String>,
    ) -> impl Stream<Item = TurnEvent> + Send + 'static {
        let (sink, rx) = EventSink::channel();
        let conversation_id = conversation_id.into();
        let utterance = utterance.into();

        tokio::spawn(async move {
            let turn_sink = sink.clone();
            let group = Arc::new(MemoryWriteGroup::new());
            let turn_group = Arc::clone(&group);
            let turn = tokio::spawn(async move {
                orchestrator
                    .run_turn(&conversation_id, &utterance, &turn_sink, &turn_group)
                    .await
            });
            let result = match turn.await {
                Ok(result) => result.map(|_| ()),
                Err(e) => {
                    // 回合任务异常退出时，已分离的记忆写入仍须跑完再发 done
                    let writes = group.join_all().await;
                    tracing::warn!(
                        "turn task aborted, drained memory writes: written={} skipped={} failed={}",
                        writes.written,
                        writes.skipped,
                        writes.failed
                    );
                    Err(TurnError::Panicked(e.to_string()))
                }
            };
            if let Err(e) = result {
                tracing::warn!("turn failed: {}", e);
                if e.is_turn_fatal() {
                    sink.emit(TurnEvent::error(&e));
                }
            }
            sink.emit(TurnEvent::done());
        });

        // done 之后不再读取，即使仍有发送端存活
        stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            let event = rx.recv().await?;
            let rest = (!event.is_terminal()).then_some(rx);
            Some((event, rest))
        })
    }
}
