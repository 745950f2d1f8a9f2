//! End-to-end tests of the streaming runtime: scripted agent streams in,
//! ordered outbound events out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use dm_domain::config::{NormalizerConfig, StreamingConfig};
use dm_domain::error::{Error, Result};
use dm_domain::stream::{AgentEvent, BoxStream};
use dm_gateway::runtime::{MessageProcessor, StartTurnRequest, TurnStatus};
use dm_protocol::ServerEvent;
use dm_speech::TextNormalizer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn quick_config() -> StreamingConfig {
    StreamingConfig {
        interrupt_wait_timeout_ms: 200,
        ..StreamingConfig::default()
    }
}

fn processor(streaming: StreamingConfig) -> MessageProcessor {
    let normalizer = TextNormalizer::new(&NormalizerConfig::default()).unwrap();
    MessageProcessor::new(streaming, Arc::new(normalizer))
}

fn start() -> AgentEvent {
    AgentEvent::StreamStart {
        turn_id: "upstream-turn".into(),
        session_id: "upstream-session".into(),
    }
}

fn token(chunk: &str) -> AgentEvent {
    AgentEvent::StreamToken {
        chunk: chunk.into(),
        node: None,
    }
}

fn end(content: &str) -> AgentEvent {
    AgentEvent::StreamEnd {
        turn_id: "upstream-turn".into(),
        session_id: "upstream-session".into(),
        content: content.into(),
    }
}

/// A finite scripted stream.
fn scripted(events: Vec<Result<AgentEvent>>) -> BoxStream<'static, Result<AgentEvent>> {
    Box::pin(futures_util::stream::iter(events))
}

/// Yields the given events, then stays pending forever (an agent mid-turn).
fn scripted_then_hang(events: Vec<Result<AgentEvent>>) -> BoxStream<'static, Result<AgentEvent>> {
    Box::pin(async_stream::stream! {
        for event in events {
            yield event;
        }
        futures_util::future::pending::<()>().await;
    })
}

/// Yields `count` terminated sentences, bumping `yielded` per item driven.
fn counting_tokens(
    count: usize,
    yielded: Arc<AtomicUsize>,
) -> BoxStream<'static, Result<AgentEvent>> {
    Box::pin(async_stream::stream! {
        yielded.fetch_add(1, Ordering::SeqCst);
        yield Ok(start());
        for idx in 0..count {
            yielded.fetch_add(1, Ordering::SeqCst);
            yield Ok(token(&format!("This is sentence number {idx}. ")));
        }
        yielded.fetch_add(1, Ordering::SeqCst);
        yield Ok(end(""));
    })
}

/// Drain the receiver until the queue closes.
async fn collect_all(mut rx: mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("event stream did not close; got so far: {events:?}"),
        }
    }
}

fn chunk_texts(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::TtsReadyChunk { chunk, .. } => Some(chunk.clone()),
            _ => None,
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_orders_chunks_before_stream_end() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: Some("s1".into()),
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("Hello")),
                Ok(token(" there.")),
                Ok(token(" How are you?")),
                Ok(end("Hello there. How are you?")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;

    // First event is stream_start with the gateway's ids.
    match &events[0] {
        ServerEvent::StreamStart {
            turn_id: t,
            session_id,
        } => {
            assert_eq!(t, &turn_id);
            assert_eq!(session_id, "s1");
        }
        other => panic!("expected stream_start first, got {other:?}"),
    }

    assert_eq!(chunk_texts(&events), vec!["Hello there.", "How are you?"]);

    // Last event is stream_end carrying the full content.
    match events.last().unwrap() {
        ServerEvent::StreamEnd { content, .. } => {
            assert_eq!(content, "Hello there. How are you?");
        }
        other => panic!("expected stream_end last, got {other:?}"),
    }

    assert_eq!(proc.turn_status(&turn_id), Some(TurnStatus::Completed));
}

#[tokio::test]
async fn short_sentences_merge_to_one_chunk() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("Hi!")),
                Ok(token(" How are you?")),
                Ok(end("Hi! How are you?")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert_eq!(chunk_texts(&events), vec!["Hi! How are you?"]);
}

#[tokio::test]
async fn multilingual_terminators_split_chunks() {
    let streaming = StreamingConfig {
        min_chunk_len: 5,
        ..quick_config()
    };
    let proc = processor(streaming);
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("こんにちは。")),
                Ok(token("お元気ですか？")),
                Ok(end("こんにちは。お元気ですか？")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert_eq!(chunk_texts(&events), vec!["こんにちは。", "お元気ですか？"]);
}

#[tokio::test]
async fn tool_events_never_reach_the_client() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![
                Ok(start()),
                Ok(AgentEvent::ToolCall {
                    tool_name: "search".into(),
                    args: serde_json::json!({"query": "weather"}),
                    node: None,
                }),
                Ok(AgentEvent::ToolResult {
                    result: serde_json::json!({"answer": "sunny"}),
                    node: None,
                }),
                Ok(token("All done here.")),
                Ok(end("All done here.")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert!(events.iter().all(|e| !matches!(
        e,
        ServerEvent::ToolCall { .. } | ServerEvent::ToolResult { .. }
    )));
    assert_eq!(chunk_texts(&events), vec!["All done here."]);
    assert!(matches!(events.last(), Some(ServerEvent::StreamEnd { .. })));
}

#[tokio::test]
async fn end_barrier_flushes_residue_before_stream_end() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            // The trailing fragment has no terminator — only finalize()
            // during the end barrier can flush it.
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("Hello there. Trailing words")),
                Ok(end("Hello there. Trailing words")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert_eq!(chunk_texts(&events), vec!["Hello there.", "Trailing words"]);

    // Every chunk precedes the terminal event.
    let end_idx = events
        .iter()
        .position(|e| matches!(e, ServerEvent::StreamEnd { .. }))
        .expect("stream_end present");
    assert_eq!(end_idx, events.len() - 1);
}

#[tokio::test]
async fn interrupt_stops_turn_within_bounded_wait() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![
                Ok(start()),
                Ok(token("One piece. ")),
                Ok(token("of text")),
            ]),
        })
        .await;

    let mut rx = proc.stream_events(&turn_id).unwrap();
    // Wait for the turn to visibly start before interrupting.
    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert!(matches!(first, Some(ServerEvent::StreamStart { .. })));

    let before = Instant::now();
    assert!(proc.interrupt(&turn_id, "client_requested").await);
    assert!(before.elapsed() < Duration::from_secs(1));

    let rest = collect_all(rx).await;
    match rest.last().expect("a terminal event") {
        ServerEvent::Interrupted { turn_id: t, reason } => {
            assert_eq!(t, &turn_id);
            assert_eq!(reason, "client_requested");
        }
        other => panic!("expected interrupted last, got {other:?}"),
    }
    assert!(!rest
        .iter()
        .any(|e| matches!(e, ServerEvent::StreamEnd { .. })));
    assert_eq!(proc.turn_status(&turn_id), Some(TurnStatus::Interrupted));
}

#[tokio::test]
async fn interrupt_before_agent_output_still_opens_the_turn() {
    let proc = processor(quick_config());
    // The agent accepted the turn but produced nothing yet; the client
    // interrupts immediately (chat_message followed by interrupt_stream).
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![]),
        })
        .await;
    let rx = proc.stream_events(&turn_id).unwrap();

    assert!(proc.interrupt(&turn_id, "client_requested").await);

    let events = collect_all(rx).await;
    // The turn still opens before it closes: a synthesized stream_start
    // precedes the terminal interrupted.
    match &events[0] {
        ServerEvent::StreamStart { turn_id: t, .. } => assert_eq!(t, &turn_id),
        other => panic!("expected stream_start first, got {other:?}"),
    }
    match events.last().expect("terminal event") {
        ServerEvent::Interrupted { turn_id: t, reason } => {
            assert_eq!(t, &turn_id);
            assert_eq!(reason, "client_requested");
        }
        other => panic!("expected interrupted last, got {other:?}"),
    }
    assert_eq!(events.len(), 2);
    assert_eq!(proc.turn_status(&turn_id), Some(TurnStatus::Interrupted));
}

#[tokio::test]
async fn second_interrupt_is_a_noop() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![Ok(start())]),
        })
        .await;

    assert!(proc.interrupt(&turn_id, "client_requested").await);
    assert!(!proc.interrupt(&turn_id, "client_requested").await);
    assert!(!proc.interrupt("no-such-turn", "client_requested").await);
}

#[tokio::test]
async fn new_chat_supersedes_running_turn() {
    let proc = processor(quick_config());
    let turn1 = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![Ok(start()), Ok(token("Thinking out loud. "))]),
        })
        .await;
    let rx1 = proc.stream_events(&turn1).unwrap();

    let turn2 = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(token("Replacement. ")), Ok(end(""))]),
        })
        .await;

    // Turn 1 closed with the superseded marker before turn 2 produced
    // anything.
    let events1 = collect_all(rx1).await;
    match events1.last().expect("terminal event for turn 1") {
        ServerEvent::Interrupted { turn_id, reason } => {
            assert_eq!(turn_id, &turn1);
            assert_eq!(reason, "superseded");
        }
        other => panic!("expected interrupted, got {other:?}"),
    }

    let events2 = collect_all(proc.stream_events(&turn2).unwrap()).await;
    assert!(matches!(&events2[0], ServerEvent::StreamStart { turn_id, .. } if turn_id == &turn2));
    assert!(matches!(events2.last(), Some(ServerEvent::StreamEnd { .. })));
}

#[tokio::test]
async fn full_token_queue_suspends_the_producer() {
    let streaming = StreamingConfig {
        queue_capacity: 2,
        min_chunk_len: 1,
        ..quick_config()
    };
    let proc = processor(streaming);

    let yielded = Arc::new(AtomicUsize::new(0));
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: counting_tokens(10, yielded.clone()),
        })
        .await;

    // Nobody reads the event queue, so the consumer wedges on a full
    // event queue and the token queue backs up to the producer.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Driven items: stream_start + at most (2 chunks the consumer moved
    // into the event queue before wedging + 2 queued tokens + 1 held at
    // the producer's blocked send). The 10-token script is nowhere near
    // drained.
    let driven = yielded.load(Ordering::SeqCst);
    assert!(driven <= 6, "upstream driven too far: {driven}");

    // Cleanly tear down the wedged turn.
    proc.interrupt(&turn_id, "client_requested").await;
}

#[tokio::test]
async fn upstream_error_fails_the_turn() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("Partial answer")),
                Err(Error::Agent("engine fell over".into())),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    match events.last().expect("a final event") {
        ServerEvent::Error { code, error } => {
            assert_eq!(*code, 500);
            assert!(error.contains("engine fell over"));
        }
        other => panic!("expected error event last, got {other:?}"),
    }
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::StreamEnd { .. })));
    assert_eq!(proc.turn_status(&turn_id), Some(TurnStatus::Failed));
}

#[tokio::test]
async fn empty_upstream_still_brackets_the_turn() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert!(matches!(&events[0], ServerEvent::StreamStart { turn_id: t, .. } if t == &turn_id));
    match events.last().unwrap() {
        ServerEvent::StreamEnd { content, .. } => assert!(content.is_empty()),
        other => panic!("expected stream_end, got {other:?}"),
    }
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn upstream_close_without_end_completes_from_aggregate() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(token("Cut off mid-thought."))]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    match events.last().unwrap() {
        ServerEvent::StreamEnd { content, .. } => assert_eq!(content, "Cut off mid-thought."),
        other => panic!("expected stream_end, got {other:?}"),
    }
}

#[tokio::test]
async fn raw_token_mirroring_preserves_chunk_stream() {
    let streaming = StreamingConfig {
        forward_raw_tokens: true,
        ..quick_config()
    };
    let proc = processor(streaming);
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![
                Ok(start()),
                Ok(token("Hello there.")),
                Ok(end("Hello there.")),
            ]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::StreamToken { chunk, .. } if chunk == "Hello there.")));
    // The contractual sentence stream is unchanged by the mirror.
    assert_eq!(chunk_texts(&events), vec!["Hello there."]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn event_stream_cannot_be_claimed_twice() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(end("x"))]),
        })
        .await;

    assert!(proc.stream_events(&turn_id).is_some());
    assert!(proc.stream_events(&turn_id).is_none());
}

#[tokio::test]
async fn expired_terminal_turns_are_swept_on_start() {
    let streaming = StreamingConfig {
        cleanup_ttl_secs: 0,
        ..quick_config()
    };
    let proc = processor(streaming);

    let old_turn = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(end("done"))]),
        })
        .await;
    // Drive the old turn to completion.
    collect_all(proc.stream_events(&old_turn).unwrap()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let new_turn = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(end("fresh"))]),
        })
        .await;

    assert_eq!(proc.turn_status(&old_turn), None);
    assert_eq!(proc.turn_count(), 1);
    collect_all(proc.stream_events(&new_turn).unwrap()).await;
}

#[tokio::test]
async fn recent_terminal_turns_survive_cleanup() {
    let proc = processor(quick_config());
    let old_turn = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(end("done"))]),
        })
        .await;
    collect_all(proc.stream_events(&old_turn).unwrap()).await;

    let _new_turn = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![Ok(start())]),
        })
        .await;

    // Default TTL is an hour; the completed record is still inspectable.
    assert_eq!(proc.turn_status(&old_turn), Some(TurnStatus::Completed));

    proc.shutdown().await;
}

#[tokio::test]
async fn shutdown_interrupts_active_turns_and_clears_the_map() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted_then_hang(vec![Ok(start()), Ok(token("Half a thought. "))]),
        })
        .await;
    let rx = proc.stream_events(&turn_id).unwrap();

    proc.shutdown().await;

    let events = collect_all(rx).await;
    match events.last().expect("terminal event") {
        ServerEvent::Interrupted { reason, .. } => assert_eq!(reason, "connection_closed"),
        other => panic!("expected interrupted, got {other:?}"),
    }
    assert_eq!(proc.turn_count(), 0);
}

#[tokio::test]
async fn generated_session_id_is_used_when_absent() {
    let proc = processor(quick_config());
    let turn_id = proc
        .start_turn(StartTurnRequest {
            session_id: None,
            upstream: scripted(vec![Ok(start()), Ok(end(""))]),
        })
        .await;

    let events = collect_all(proc.stream_events(&turn_id).unwrap()).await;
    let session_from_start = events.iter().find_map(|e| match e {
        ServerEvent::StreamStart { session_id, .. } => Some(session_id.clone()),
        _ => None,
    });
    let session_from_end = events.iter().find_map(|e| match e {
        ServerEvent::StreamEnd { session_id, .. } => Some(session_id.clone()),
        _ => None,
    });
    let generated = session_from_start.expect("stream_start present");
    assert!(!generated.is_empty());
    assert_eq!(Some(generated), session_from_end);
}
