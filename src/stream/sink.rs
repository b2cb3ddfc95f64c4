//! 事件出口：所有 Agent 流水线共享，一次写入一整帧
//!
//! 消费端断开后写入静默丢弃，生产端继续跑完。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::stream::TurnEvent;

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// 发送一个事件；返回消费端是否仍在
    pub fn emit(&self, event: TurnEvent) -> bool {
        let name = event.name();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                if !self.closed.swap(true, Ordering::Relaxed) {
                    tracing::info!("event consumer went away (first dropped event: {})", name);
                }
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed) || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_after_consumer_drop_is_silent() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.emit(TurnEvent::done()));
        assert_eq!(rx.recv().await, Some(TurnEvent::done()));
        drop(rx);
        assert!(!sink.emit(TurnEvent::error("late")));
        assert!(!sink.emit(TurnEvent::done()));
        assert!(sink.is_closed());
    }
}
