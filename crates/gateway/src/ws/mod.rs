//! WebSocket endpoint for companion clients.
//!
//! Flow:
//! 1. Client connects to `/v1/chat/stream` and is assigned a fresh
//!    `connection_id`
//! 2. Client sends `authorize` within the deadline; gateway answers
//!    `authorize_success` plus the active avatar configuration
//! 3. Bidirectional loop: `chat_message` turns stream back as
//!    `stream_start` / `tts_ready_chunk` / `stream_end`, with
//!    `ping`/`pong` heartbeats and `interrupt_stream` running concurrently

pub mod connection;
pub mod heartbeat;
pub mod registry;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::state::AppState;

/// GET /v1/chat/stream — upgrade to WebSocket.
///
/// Authorization happens in-band (`authorize` message), not at upgrade
/// time, so the upgrade itself is unconditional.
pub async fn chat_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
