use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    /// Base64 data or a URL the vision service can fetch.
    pub image: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// POST /v1/vlm/analyze — describe an image.
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> impl IntoResponse {
    match state.vlm.analyze(&body.image, body.prompt.as_deref()).await {
        Ok(resp) => Json(serde_json::json!({ "text": resp.text })).into_response(),
        Err(e) => (
            axum::http::StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
