//! The per-turn event pipeline: a producer task draining the agent stream
//! and a consumer task turning buffered tokens into synthesis-ready
//! sentence chunks. The two communicate exclusively through the turn's
//! bounded queues; the queues are the synchronization primitive.
//!
//! End-of-stream ordering is protected by a two-phase barrier: after
//! pushing the end-of-tokens sentinel the producer first waits for the
//! consumer to drain the token queue, then (bounded) for the consumer's
//! post-drain flush, and only then enqueues `stream_end`. Without the
//! barrier a late `tts_ready_chunk` could reach the client after the
//! terminal event.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dm_domain::error::Result;
use dm_domain::stream::{AgentEvent, BoxStream};
use dm_protocol::ServerEvent;
use dm_speech::{ChunkSplitter, TextNormalizer};

use super::turn::{TokenItem, TurnShared, TurnStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything both tasks need, cloned once per task at spawn.
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub shared: Arc<TurnShared>,
    pub event_tx: mpsc::Sender<ServerEvent>,
    pub cancel: CancellationToken,
    pub interrupt_wait: Duration,
    pub forward_raw_tokens: bool,
}

/// Send an event unless cancellation fires first. Returns false when the
/// send did not happen (cancelled or the queue closed).
async fn send_event(ctx: &PipelineContext, event: ServerEvent) -> bool {
    tokio::select! {
        _ = ctx.cancel.cancelled() => false,
        sent = ctx.event_tx.send(event) => sent.is_ok(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Producer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain the agent stream into the turn's queues.
///
/// Tool events are logged with structured fields and never enqueued. The
/// token queue write is the backpressure point: when it is full this task
/// suspends, which stops the upstream iterator from being driven.
pub(crate) async fn run_producer(
    ctx: PipelineContext,
    mut upstream: BoxStream<'static, Result<AgentEvent>>,
    token_tx: mpsc::Sender<TokenItem>,
    drained_rx: oneshot::Receiver<()>,
    flushed_rx: oneshot::Receiver<()>,
) {
    // Outstanding tool calls, matched FIFO against results (the agent
    // contract carries no call ids).
    let mut tool_starts: VecDeque<(String, Instant)> = VecDeque::new();
    let mut drained_rx = Some(drained_rx);
    let mut flushed_rx = Some(flushed_rx);

    loop {
        let event = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                finish_interrupted(&ctx, flushed_rx.take()).await;
                return;
            }
            ev = upstream.next() => ev,
        };

        match event {
            Some(Ok(AgentEvent::StreamStart { .. })) => {
                // The gateway's ids are authoritative on the wire.
                ctx.shared.advance(TurnStatus::Running);
                if send_event(&ctx, stream_start_event(&ctx)).await {
                    ctx.shared.mark_started();
                }
            }

            Some(Ok(AgentEvent::StreamToken { chunk, node })) => {
                ctx.shared.append_content(&chunk);
                if ctx.forward_raw_tokens {
                    send_event(
                        &ctx,
                        ServerEvent::StreamToken {
                            chunk: chunk.clone(),
                            node,
                        },
                    )
                    .await;
                }
                // Backpressure point: a full token queue suspends this
                // task, which throttles the agent stream.
                let sent = tokio::select! {
                    _ = ctx.cancel.cancelled() => {
                        finish_interrupted(&ctx, flushed_rx.take()).await;
                        return;
                    }
                    sent = token_tx.send(TokenItem::Chunk(chunk)) => sent,
                };
                if sent.is_err() {
                    tracing::warn!(
                        turn_id = %ctx.shared.turn_id,
                        "token queue closed early; dropping remaining tokens"
                    );
                }
            }

            Some(Ok(AgentEvent::ToolCall {
                tool_name, args, ..
            })) => {
                tracing::info!(
                    turn_id = %ctx.shared.turn_id,
                    session_id = %ctx.shared.session_id,
                    tool_name = %tool_name,
                    args = %args,
                    status = "started",
                    "tool call"
                );
                tool_starts.push_back((tool_name, Instant::now()));
            }

            Some(Ok(AgentEvent::ToolResult { result, .. })) => {
                let (tool_name, started_at) = tool_starts
                    .pop_front()
                    .unwrap_or_else(|| ("unknown".to_owned(), Instant::now()));
                tracing::info!(
                    turn_id = %ctx.shared.turn_id,
                    session_id = %ctx.shared.session_id,
                    tool_name = %tool_name,
                    result = %result,
                    status = "finished",
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    "tool result"
                );
            }

            Some(Ok(AgentEvent::StreamEnd { content, .. })) => {
                if !content.is_empty() {
                    ctx.shared.set_content(content);
                }
                finish_stream(
                    &ctx,
                    &token_tx,
                    drained_rx.take(),
                    flushed_rx.take(),
                    None,
                )
                .await;
                return;
            }

            Some(Err(e)) => {
                tracing::warn!(
                    turn_id = %ctx.shared.turn_id,
                    error = %e,
                    "agent stream error"
                );
                finish_stream(
                    &ctx,
                    &token_tx,
                    drained_rx.take(),
                    flushed_rx.take(),
                    Some(e.to_string()),
                )
                .await;
                return;
            }

            None => {
                // Upstream closed without a terminal event; complete from
                // the reconstructed aggregate.
                finish_stream(
                    &ctx,
                    &token_tx,
                    drained_rx.take(),
                    flushed_rx.take(),
                    None,
                )
                .await;
                return;
            }
        }
    }
}

/// Terminal path for a finished (or failed) upstream: run the two-phase
/// barrier, then emit exactly one terminal event.
async fn finish_stream(
    ctx: &PipelineContext,
    token_tx: &mpsc::Sender<TokenItem>,
    drained_rx: Option<oneshot::Receiver<()>>,
    flushed_rx: Option<oneshot::Receiver<()>>,
    upstream_error: Option<String>,
) {
    let _ = token_tx.send(TokenItem::Done).await;

    // Phase 1: the consumer acknowledges the sentinel. FIFO with a single
    // writer means the token queue is fully drained at that instant. A
    // recv error (consumer gone) ends the wait immediately.
    if let Some(drained_rx) = drained_rx {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                finish_interrupted(ctx, flushed_rx).await;
                return;
            }
            _ = drained_rx => {}
        }
    }

    // Phase 2: the consumer's post-drain finalize() flush, bounded so a
    // wedged consumer cannot hold the terminal event hostage.
    if let Some(flushed_rx) = flushed_rx {
        if tokio::time::timeout(ctx.interrupt_wait, flushed_rx)
            .await
            .is_err()
        {
            tracing::warn!(
                turn_id = %ctx.shared.turn_id,
                "consumer flush did not finish within the wait window"
            );
        }
    }

    ensure_stream_started(ctx).await;

    match upstream_error {
        None => {
            if ctx.shared.advance(TurnStatus::Completed) {
                let event = ServerEvent::StreamEnd {
                    turn_id: ctx.shared.turn_id.clone(),
                    session_id: ctx.shared.session_id.clone(),
                    content: ctx.shared.content(),
                };
                let _ = ctx.event_tx.send(event).await;
            } else {
                // An interrupt raced the completion; honor it.
                emit_interrupted(ctx).await;
            }
        }
        Some(error) => {
            if ctx.shared.advance(TurnStatus::Failed) {
                let _ = ctx.event_tx.send(ServerEvent::Error { code: 500, error }).await;
            } else {
                emit_interrupted(ctx).await;
            }
        }
    }
}

/// Cancellation path: wait (bounded) for the consumer to stop emitting,
/// then close the turn with the terminal `interrupted` event.
async fn finish_interrupted(ctx: &PipelineContext, flushed_rx: Option<oneshot::Receiver<()>>) {
    if let Some(flushed_rx) = flushed_rx {
        // Resolves as soon as the consumer exits (flush or sender drop).
        let _ = tokio::time::timeout(ctx.interrupt_wait, flushed_rx).await;
    }
    ensure_stream_started(ctx).await;
    ctx.shared.advance(TurnStatus::Interrupted);
    emit_interrupted(ctx).await;
}

fn stream_start_event(ctx: &PipelineContext) -> ServerEvent {
    ServerEvent::StreamStart {
        turn_id: ctx.shared.turn_id.clone(),
        session_id: ctx.shared.session_id.clone(),
    }
}

/// Every turn opens before it closes: when the upstream never produced a
/// `stream_start` (interrupted while still pending, or an empty/broken
/// stream), enqueue a synthesized one ahead of the terminal event.
async fn ensure_stream_started(ctx: &PipelineContext) {
    if ctx.shared.has_started() {
        return;
    }
    let _ = tokio::time::timeout(ctx.interrupt_wait, ctx.event_tx.send(stream_start_event(ctx)))
        .await;
    ctx.shared.mark_started();
}

async fn emit_interrupted(ctx: &PipelineContext) {
    let event = ServerEvent::Interrupted {
        turn_id: ctx.shared.turn_id.clone(),
        reason: ctx.shared.interrupt_reason(),
    };
    let _ = tokio::time::timeout(ctx.interrupt_wait, ctx.event_tx.send(event)).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consumer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn queued tokens into normalized `tts_ready_chunk` events.
///
/// On the `Done` sentinel: signal `drained`, flush the splitter residue,
/// signal `flushed`, exit. On cancellation: discard the buffer and exit at
/// the next suspension point.
pub(crate) async fn run_consumer(
    ctx: PipelineContext,
    mut token_rx: mpsc::Receiver<TokenItem>,
    min_chunk_len: usize,
    normalizer: Arc<TextNormalizer>,
    drained_tx: oneshot::Sender<()>,
    flushed_tx: oneshot::Sender<()>,
) {
    let mut splitter = ChunkSplitter::new(min_chunk_len);
    let mut drained_tx = Some(drained_tx);
    let mut flushed_tx = Some(flushed_tx);

    loop {
        let item = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            item = token_rx.recv() => item,
        };

        match item {
            Some(TokenItem::Chunk(text)) => {
                for sentence in splitter.feed(&text) {
                    if let Some(chunk) = normalizer.process(&sentence) {
                        if !send_chunk(&ctx, chunk).await {
                            return;
                        }
                    }
                }
            }
            Some(TokenItem::Done) | None => {
                if let Some(tx) = drained_tx.take() {
                    let _ = tx.send(());
                }
                if let Some(residue) = splitter.finalize() {
                    if let Some(chunk) = normalizer.process(&residue) {
                        send_chunk(&ctx, chunk).await;
                    }
                }
                if let Some(tx) = flushed_tx.take() {
                    let _ = tx.send(());
                }
                return;
            }
        }
    }
}

async fn send_chunk(ctx: &PipelineContext, chunk: dm_speech::NormalizedChunk) -> bool {
    send_event(
        ctx,
        ServerEvent::TtsReadyChunk {
            chunk: chunk.text,
            emotion: chunk.emotion,
        },
    )
    .await
}
