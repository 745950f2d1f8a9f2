pub mod auth;
pub mod health;
pub mod memory;
pub mod tts;
pub mod vlm;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full router.
///
/// Routes split into **public** (health probe and the WebSocket, which
/// authorizes in-band) and **protected** (REST proxies gated behind the
/// `DM_API_TOKEN` bearer middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health::health))
        // Streaming channel — authorization happens after upgrade.
        .route("/v1/chat/stream", get(crate::ws::chat_stream));

    let protected = Router::new()
        // TTS proxy (clients synthesize marked chunks out of band)
        .route("/v1/tts/synthesize", post(tts::synthesize))
        // Vision proxy
        .route("/v1/vlm/analyze", post(vlm::analyze))
        // Short-term memory (sessions + history)
        .route(
            "/v1/stm/sessions",
            post(memory::create_session).get(memory::list_sessions),
        )
        .route(
            "/v1/stm/sessions/:id",
            get(memory::get_session)
                .patch(memory::rename_session)
                .delete(memory::delete_session),
        )
        .route("/v1/stm/sessions/:id/messages", get(memory::list_messages))
        // Long-term memory
        .route("/v1/ltm/memories", post(memory::add_memory))
        .route("/v1/ltm/search", post(memory::search_memories))
        .route("/v1/ltm/memories/:id", delete(memory::delete_memory))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
