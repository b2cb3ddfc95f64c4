//! 记忆写入任务组：各 Agent 流水线并发追加分离的写入任务，回合结束前统一等待
//!
//! 等待时容忍单个任务失败或 panic，只做统计与日志。

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinSet;

use crate::memory::{MemoryError, WriteOutcome};

type Labeled = (String, Result<WriteOutcome, MemoryError>);

/// 写入汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WriteSummary {
    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

#[derive(Default)]
pub struct MemoryWriteGroup {
    tasks: Mutex<JoinSet<Labeled>>,
}

impl MemoryWriteGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分离一个写入任务；label 用于日志（一般为 Agent 名）
    pub fn spawn<F>(&self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<WriteOutcome, MemoryError>> + Send + 'static,
    {
        let label = label.into();
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.spawn(async move { (label, fut.await) });
            }
            Err(_) => {
                tracing::error!("memory write group poisoned, dropping write for {}", label);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// 等待全部任务结束（包括等待期间新追加的任务）
    pub async fn join_all(&self) -> WriteSummary {
        let mut summary = WriteSummary::default();
        loop {
            let mut batch = match self.tasks.lock() {
                Ok(mut tasks) => std::mem::take(&mut *tasks),
                Err(_) => break,
            };
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                match joined {
                    Ok((label, Ok(WriteOutcome::Written(id)))) => {
                        tracing::debug!("memory write for {} stored as #{}", label, id);
                        summary.written += 1;
                    }
                    Ok((_, Ok(WriteOutcome::Skipped))) => summary.skipped += 1,
                    Ok((label, Err(e))) => {
                        tracing::warn!("memory write for {} failed: {}", label, e);
                        summary.failed += 1;
                    }
                    Err(e) => {
                        tracing::warn!("memory write task aborted: {}", e);
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }
}
