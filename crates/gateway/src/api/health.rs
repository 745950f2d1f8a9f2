use axum::extract::State;
use axum::response::{IntoResponse, Json};

use dm_services::ServiceHealth;

use crate::state::AppState;

/// GET /health — aggregate readiness across the external services.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (agent, tts, vlm, stm, ltm) = tokio::join!(
        state.agent.is_healthy(),
        state.tts.is_healthy(),
        state.vlm.is_healthy(),
        state.stm.is_healthy(),
        state.ltm.is_healthy(),
    );

    let services = [
        ("agent", agent),
        ("tts", tts),
        ("vlm", vlm),
        ("stm", stm),
        ("ltm", ltm),
    ];

    let all_healthy = services.iter().all(|(_, (healthy, _))| *healthy);
    let body = serde_json::json!({
        "status": if all_healthy { "ok" } else { "degraded" },
        "connections": state.connections.len(),
        "services": services
            .iter()
            .map(|(name, (healthy, message))| {
                (name.to_string(), serde_json::json!({
                    "healthy": healthy,
                    "message": message,
                }))
            })
            .collect::<serde_json::Map<_, _>>(),
    });

    Json(body)
}
