//! Thin REST proxies over the short- and long-term memory stores.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use dm_services::stm::CreateSessionRequest;
use dm_services::ltm::{MemoryAddRequest, MemorySearchRequest};

use crate::state::AppState;

fn gateway_error(e: dm_domain::error::Error) -> axum::response::Response {
    (
        axum::http::StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Short-term memory (sessions)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let req = CreateSessionRequest {
        user_id: body.user_id,
        agent_id: body.agent_id,
        title: body.title,
    };
    match state.stm.create_session(&req).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => gateway_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub user_id: String,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    match state.stm.list_sessions(&query.user_id).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => gateway_error(e),
    }
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.stm.get_session(&session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => gateway_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionBody {
    pub title: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<RenameSessionBody>,
) -> impl IntoResponse {
    match state.stm.rename_session(&session_id, &body.title).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => gateway_error(e),
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.stm.delete_session(&session_id).await {
        Ok(()) => Json(serde_json::json!({ "deleted": session_id })).into_response(),
        Err(e) => gateway_error(e),
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.stm.list_messages(&session_id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => gateway_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Long-term memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AddMemoryBody {
    pub content: String,
    pub user_id: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

pub async fn add_memory(
    State(state): State<AppState>,
    Json(body): Json<AddMemoryBody>,
) -> impl IntoResponse {
    let req = MemoryAddRequest {
        content: body.content,
        user_id: body.user_id,
        metadata: body.metadata,
    };
    match state.ltm.add(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => gateway_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchMemoryBody {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn search_memories(
    State(state): State<AppState>,
    Json(body): Json<SearchMemoryBody>,
) -> impl IntoResponse {
    let req = MemorySearchRequest {
        query: body.query,
        user_id: body.user_id,
        limit: body.limit,
    };
    match state.ltm.search(&req).await {
        Ok(hits) => Json(serde_json::json!({
            "count": hits.len(),
            "memories": hits,
        }))
        .into_response(),
        Err(e) => gateway_error(e),
    }
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.ltm.delete(&id).await {
        Ok(()) => Json(serde_json::json!({ "deleted": id })).into_response(),
        Err(e) => gateway_error(e),
    }
}
