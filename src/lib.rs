//! Mind Theatre - 多声部内心对话
//!
//! 每个 Agent 人格独立回答用户，回答被合成为一个第一人称回复；每个 Agent 积累只属于自己、可按向量检索的记忆。
//!
//! 模块划分：
//! - **config**: 应用配置（TOML + 环境变量）与 Agent 名册
//! - **core**: 回合编排、合成者、情绪评分、记忆写入任务组
//! - **llm**: 补全 / 嵌入客户端抽象与实现（OpenAI 兼容 / Ollama / Mock）
//! - **memory**: 工作记忆窗口、情景记忆、近似最近邻索引、SQLite 持久化
//! - **observability**: 日志初始化
//! - **runtime**: 启动时装配全部服务
//! - **stream**: 回合事件流与线协议

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod runtime;
pub mod stream;

pub use runtime::{assemble, build_runtime, Runtime, RuntimeError};
