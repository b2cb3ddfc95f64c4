//! Mind Theatre Web API
//!
//! 启动: cargo run --bin mind-theatre-web --features web
//! 回合接口返回 text/event-stream，每帧 `event: <name>\ndata: <JSON>\n\n`

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use mind_theatre::config::{load_config, AppConfig};
use mind_theatre::core::PSYCHE_NAME;
use mind_theatre::memory::{
    ClearSummary, Conversation, ConversationSummary, MemoryRecord, MemorySort, SortOrder,
    Store, StoredMessage,
};
use mind_theatre::{build_runtime, observability, Runtime};

struct AppState {
    runtime: Runtime,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Deserialize)]
struct TurnRequest {
    message: String,
}

#[derive(Deserialize)]
struct MemoryQuery {
    #[serde(default)]
    sort_by: MemorySort,
    #[serde(default)]
    order: SortOrder,
}

#[derive(Serialize)]
struct AgentInfo {
    name: String,
    color: String,
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let runtime = build_runtime(cfg)?;
    let state = Arc::new(AppState { runtime });

    let app = Router::new()
        .route("/api/chats", get(api_chats_list).post(api_chats_create))
        .route("/api/chats/:id/history", get(api_chat_history))
        .route("/api/chats/:id/turn", post(api_chat_turn))
        .route("/api/agents", get(api_agents_list))
        .route("/api/agents/:name/memories", get(api_agent_memories))
        .route("/api/clear_memory", post(api_clear_memory))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let port = std::env::var("THEATRE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Mind Theatre API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// POST /api/chats：新建会话
async fn api_chats_create(State(state): State<Arc<AppState>>) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .runtime
        .create_conversation()
        .await
        .map_err(internal)?;
    Ok(Json(conversation))
}

/// GET /api/chats：会话列表（最新在前，附首条用户消息预览）
async fn api_chats_list(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let list = state
        .runtime
        .orchestrator
        .store()
        .list_conversations()
        .await
        .map_err(internal)?;
    Ok(Json(list))
}

async fn api_chat_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    let store = state.runtime.orchestrator.store();
    if store.get_conversation(&id).await.map_err(internal)?.is_none() {
        return Err((StatusCode::NOT_FOUND, "conversation not found".to_string()));
    }
    let messages = store.messages(&id).await.map_err(internal)?;
    Ok(Json(messages))
}

/// POST /api/chats/:id/turn：运行一个回合，事件流式返回；未知会话以 error + done 结束
async fn api_chat_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> ApiResult<Response> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    type BoxErr = Box<dyn std::error::Error + Send + Sync>;
    let stream = state
        .runtime
        .start_turn(id, message)
        .map(|event| Ok::<Bytes, BoxErr>(Bytes::from(event.frame())));

    let mut res = Response::new(Body::from_stream(stream));
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    Ok(res)
}

async fn api_agents_list(State(state): State<Arc<AppState>>) -> Json<Vec<AgentInfo>> {
    let agents = state
        .runtime
        .roster
        .agents
        .iter()
        .map(|a| AgentInfo {
            name: a.name.clone(),
            color: a.color.clone(),
            model: a.params.model.clone(),
        })
        .collect();
    Json(agents)
}

/// GET /api/agents/:name/memories?sort_by=timestamp|recall_count&order=asc|desc
///
/// name 为名册中的 Agent 或 Psyche，其余返回 404
async fn api_agent_memories(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(q): Query<MemoryQuery>,
) -> ApiResult<Json<Vec<MemoryRecord>>> {
    if name != PSYCHE_NAME && state.runtime.roster.find(&name).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown agent: {name}")));
    }
    let records = state
        .runtime
        .orchestrator
        .store()
        .list_memories(&name, q.sort_by, q.order)
        .await
        .map_err(internal)?;
    Ok(Json(records))
}

/// POST /api/clear_memory：清空全部会话、消息与记忆
async fn api_clear_memory(State(state): State<Arc<AppState>>) -> ApiResult<Json<ClearSummary>> {
    let summary = state.runtime.clear_all().await.map_err(internal)?;
    Ok(Json(summary))
}
