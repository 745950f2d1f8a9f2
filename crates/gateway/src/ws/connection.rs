//! Per-connection lifecycle: authorization handshake, inbound dispatch,
//! turn forwarding, and teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dm_protocol::{ClientMessage, ServerEvent};
use dm_services::AgentStreamRequest;

use crate::runtime::{MessageProcessor, StartTurnRequest};
use crate::state::AppState;

use super::heartbeat::run_heartbeat;
use super::registry::ConnectionHealth;

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = dm_protocol::encode(event).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound channel: heartbeat and turn forwarders funnel through one
    // writer task so frames never interleave.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(64);
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            if send_event(&mut ws_sink, &event).await.is_err() {
                break;
            }
        }
    });

    let health = Arc::new(ConnectionHealth::new());
    state.connections.register(&connection_id, health.clone());

    // 1. Authorization handshake, bounded by the configured deadline.
    //    An `authorize` message is required even when the gate is open;
    //    the gate only decides whether its token is checked.
    let streaming = state.config.streaming.clone();
    let token = wait_for_authorize(&mut ws_stream, streaming.auth_deadline()).await;
    let accepted = match token.as_deref() {
        Some(presented) => state.client_gate.permits(Some(presented)),
        None => false,
    };

    if !accepted {
        tracing::warn!(connection_id = %connection_id, "authorization failed");
        let _ = outbound_tx
            .send(ServerEvent::AuthorizeError {
                error: "authorization failed".into(),
            })
            .await;
        drop(outbound_tx);
        let _ = writer.await;
        state.connections.remove(&connection_id);
        return;
    }

    health.touch_inbound();
    let _ = outbound_tx
        .send(ServerEvent::AuthorizeSuccess {
            connection_id: connection_id.clone(),
        })
        .await;
    // Tell the client which avatar/model it is talking to.
    if let Some(profile) = state.assets.current() {
        let _ = outbound_tx
            .send(ServerEvent::SetModelAndConf {
                conf_name: profile.conf_name,
                conf_uid: profile.conf_uid,
                model: profile.model,
            })
            .await;
    }

    // 2. Per-connection processor + heartbeat.
    let processor = Arc::new(MessageProcessor::new(
        streaming.clone(),
        state.normalizer.clone(),
    ));
    state
        .connections
        .mark_authorized(&connection_id, processor.clone());

    let conn_cancel = CancellationToken::new();
    let heartbeat = tokio::spawn(run_heartbeat(
        outbound_tx.clone(),
        health.clone(),
        conn_cancel.clone(),
        streaming.clone(),
        connection_id.clone(),
    ));

    tracing::info!(connection_id = %connection_id, "client authorized");

    // 3. Inbound loop until close, error budget exhaustion, or heartbeat
    //    cancellation.
    let forwarder = read_loop(
        &state,
        &mut ws_stream,
        &outbound_tx,
        &processor,
        &health,
        &conn_cancel,
        &connection_id,
    )
    .await;

    // 4. Teardown. Shutdown closes every turn queue, which ends any
    //    forwarder still draining.
    conn_cancel.cancel();
    processor.shutdown().await;
    if let Some(forwarder) = forwarder {
        let _ = tokio::time::timeout(streaming.interrupt_wait(), forwarder).await;
    }
    let _ = heartbeat.await;
    drop(outbound_tx);
    let _ = writer.await;
    state.connections.remove(&connection_id);
    tracing::info!(connection_id = %connection_id, "connection closed");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authorization phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wait for the first text frame. Returns the token only when that frame
/// is a well-formed `authorize`; anything else (or the deadline) fails the
/// handshake.
async fn wait_for_authorize(
    stream: &mut SplitStream<WebSocket>,
    deadline: Duration,
) -> Option<String> {
    let attempt = tokio::time::timeout(deadline, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    return match dm_protocol::decode(&text) {
                        Ok(ClientMessage::Authorize { token }) => Some(token),
                        _ => None,
                    };
                }
                Message::Close(_) => return None,
                // Transport ping/pong before auth is tolerated.
                _ => {}
            }
        }
        None
    })
    .await;

    attempt.unwrap_or(None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read loop + dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns the still-running forwarder of the last turn, if any, so
/// teardown can drain it.
async fn read_loop(
    state: &AppState,
    ws_stream: &mut SplitStream<WebSocket>,
    outbound_tx: &mpsc::Sender<ServerEvent>,
    processor: &Arc<MessageProcessor>,
    health: &Arc<ConnectionHealth>,
    conn_cancel: &CancellationToken,
    connection_id: &str,
) -> Option<JoinHandle<()>> {
    let streaming = &state.config.streaming;
    let mut consecutive_errors: u32 = 0;
    let mut forwarder: Option<JoinHandle<()>> = None;

    loop {
        let frame = tokio::select! {
            _ = conn_cancel.cancelled() => break,
            frame = ws_stream.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::debug!(connection_id, error = %e, "read failed");
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => {
                health.touch_inbound();
                match dm_protocol::decode(&text) {
                    Ok(client_msg) => {
                        consecutive_errors = 0;
                        dispatch(
                            state,
                            client_msg,
                            outbound_tx,
                            processor,
                            health,
                            connection_id,
                            &mut forwarder,
                        )
                        .await;
                    }
                    Err(codec_err) => {
                        consecutive_errors += 1;
                        tracing::debug!(
                            connection_id,
                            consecutive_errors,
                            error = %codec_err,
                            "invalid inbound message"
                        );
                        let _ = outbound_tx.send(codec_err.to_event()).await;
                        if consecutive_errors >= streaming.max_error_tolerance {
                            tracing::warn!(
                                connection_id,
                                "error budget exhausted; closing connection"
                            );
                            break;
                        }
                        tokio::time::sleep(streaming.error_backoff()).await;
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // Transport-level frames; the axum layer answers pings.
                health.touch_inbound();
            }
            _ => {}
        }
    }

    forwarder
}

async fn dispatch(
    state: &AppState,
    msg: ClientMessage,
    outbound_tx: &mpsc::Sender<ServerEvent>,
    processor: &Arc<MessageProcessor>,
    health: &Arc<ConnectionHealth>,
    connection_id: &str,
    forwarder: &mut Option<JoinHandle<()>>,
) {
    match msg {
        ClientMessage::ChatMessage {
            content,
            user_id,
            agent_id,
            session_id,
            persona,
            images,
            metadata: _,
        } => {
            state.connections.set_user(connection_id, &user_id);
            // Resolve the session id up front so the agent request and the
            // turn record agree.
            let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

            let upstream = match state
                .agent
                .stream(AgentStreamRequest {
                    input_message: content,
                    session_id: session_id.clone(),
                    user_id,
                    agent_id,
                    persona,
                    images,
                })
                .await
            {
                Ok(upstream) => upstream,
                Err(e) => {
                    tracing::warn!(connection_id, error = %e, "agent stream request failed");
                    let _ = outbound_tx
                        .send(ServerEvent::Error {
                            code: 500,
                            error: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            // start_turn interrupts any running turn (superseded) before
            // spawning the new one, so the previous forwarder is already
            // draining a closed queue here. Await it to keep the old
            // turn's terminal event ahead of the new stream_start on the
            // wire.
            let turn_id = processor
                .start_turn(StartTurnRequest {
                    session_id: Some(session_id),
                    upstream,
                })
                .await;
            if let Some(prev) = forwarder.take() {
                let _ = tokio::time::timeout(
                    state.config.streaming.interrupt_wait(),
                    prev,
                )
                .await;
            }

            match processor.stream_events(&turn_id) {
                Some(mut rx) => {
                    let outbound = outbound_tx.clone();
                    *forwarder = Some(tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            if outbound.send(event).await.is_err() {
                                break;
                            }
                        }
                    }));
                }
                None => {
                    tracing::error!(connection_id, turn_id = %turn_id, "event stream missing");
                }
            }
        }

        ClientMessage::InterruptStream { turn_id } => match turn_id {
            Some(turn_id) => {
                processor.interrupt(&turn_id, "client_requested").await;
            }
            None => {
                processor.interrupt_all("client_requested").await;
            }
        },

        ClientMessage::Pong {} => {
            health.touch_pong();
        }

        ClientMessage::Authorize { .. } => {
            let _ = outbound_tx
                .send(ServerEvent::Error {
                    code: 400,
                    error: "connection is already authorized".into(),
                })
                .await;
        }

        ClientMessage::FetchBackgrounds {} => {
            let _ = outbound_tx
                .send(ServerEvent::BackgroundFiles {
                    files: state.assets.list_backgrounds(),
                })
                .await;
        }

        ClientMessage::FetchAvatarConfigs {} => {
            let _ = outbound_tx
                .send(ServerEvent::AvatarConfigFiles {
                    configs: state.assets.list_avatar_configs(),
                })
                .await;
        }

        ClientMessage::SwitchAvatarConfig { file } => match state.assets.switch(&file) {
            Ok(()) => {
                let _ = outbound_tx
                    .send(ServerEvent::AvatarConfigSwitched { file })
                    .await;
            }
            Err(e) => {
                let _ = outbound_tx
                    .send(ServerEvent::Error {
                        code: 400,
                        error: e.to_string(),
                    })
                    .await;
            }
        },
    }
}
