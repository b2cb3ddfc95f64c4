//! Mind Theatre 控制台入口
//!
//! 创建一个新会话，从 stdin 逐行读取用户输入，每轮把事件按线协议帧打印到 stdout。
//! 输入 `/clear` 清空全部数据并换到一个新会话。
//! Ctrl-C 停止读取新输入；进行中的回合会跑完（包括记忆写入）。

use std::path::PathBuf;

use anyhow::Context;
use futures_util::StreamExt;
use mind_theatre::config::{load_config, AppConfig};
use mind_theatre::{build_runtime, observability};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let runtime = build_runtime(cfg).context("Failed to build runtime")?;
    let mut conversation = runtime
        .create_conversation()
        .await
        .context("Failed to create conversation")?;
    tracing::info!("Conversation {} started", conversation.id);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if utterance == "/clear" {
            let (summary, fresh) = runtime.reset().await.context("Clear failed")?;
            println!(
                "cleared {} messages, {} conversations, {} memories",
                summary.messages, summary.conversations, summary.memories
            );
            conversation = fresh;
            continue;
        }

        // 回合本身不受 Ctrl-C 影响，直到 done 才读下一行
        let mut events = Box::pin(runtime.start_turn(conversation.id.clone(), utterance));
        while let Some(event) = events.next().await {
            print!("{}", event.frame());
        }
    }

    tracing::info!("Bye");
    Ok(())
}
