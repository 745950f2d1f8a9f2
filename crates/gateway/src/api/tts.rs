use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SynthesizeBody {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

/// POST /v1/tts/synthesize — proxy one utterance to the TTS engine.
pub async fn synthesize(
    State(state): State<AppState>,
    Json(body): Json<SynthesizeBody>,
) -> impl IntoResponse {
    if body.text.trim().is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "text must not be empty" })),
        )
            .into_response();
    }

    match state.tts.synthesize(&body.text, body.voice.as_deref()).await {
        Ok(resp) => Json(serde_json::json!({
            "audio": resp.audio,
            "format": resp.format,
        }))
        .into_response(),
        Err(e) => (
            axum::http::StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
