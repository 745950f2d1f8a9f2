//! REST authentication middleware.
//!
//! Protected routes must carry `Authorization: Bearer <token>` matching
//! the [`TokenGate`](crate::tokens::TokenGate) built at startup from
//! `server.api_token_env`. An open gate (env var unset) waves every
//! request through; the WebSocket surface authorizes separately, in-band.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;
use crate::tokens;

/// Attach via `axum::middleware::from_fn_with_state` on protected routes.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if state.api_gate.permits(tokens::bearer(header)) {
        return next.run(req).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
    )
        .into_response()
}
