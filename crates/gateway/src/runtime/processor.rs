//! Per-connection orchestrator: owns the turn map, starts and interrupts
//! turns, and hands out each turn's outbound event stream.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use dm_domain::config::StreamingConfig;
use dm_domain::error::Result;
use dm_domain::stream::{AgentEvent, BoxStream};
use dm_protocol::ServerEvent;
use dm_speech::TextNormalizer;

use super::pipeline::{run_consumer, run_producer, PipelineContext};
use super::supervisor::TaskSupervisor;
use super::turn::{TokenItem, TurnShared, TurnState, TurnStatus};

/// Input to [`MessageProcessor::start_turn`].
pub struct StartTurnRequest {
    /// Logical conversation id; generated when absent.
    pub session_id: Option<String>,
    /// The agent's event stream for this turn.
    pub upstream: BoxStream<'static, Result<AgentEvent>>,
}

/// One processor per authorized connection. Turns are owned exclusively
/// here; tasks refer back only through the shared per-turn cell, never
/// through the map.
pub struct MessageProcessor {
    streaming: StreamingConfig,
    normalizer: Arc<TextNormalizer>,
    turns: Mutex<HashMap<String, TurnState>>,
}

impl MessageProcessor {
    pub fn new(streaming: StreamingConfig, normalizer: Arc<TextNormalizer>) -> Self {
        Self {
            streaming,
            normalizer,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new response turn and return its id.
    ///
    /// Runs opportunistic cleanup of aged terminal turns first, then
    /// interrupts any still-running turn with reason `superseded` (a
    /// conversational UI replaces, it does not reject) before spawning
    /// the new producer/consumer pair.
    pub async fn start_turn(&self, req: StartTurnRequest) -> String {
        self.cleanup_expired();

        for turn_id in self.active_turn_ids() {
            self.interrupt(&turn_id, "superseded").await;
        }

        let session_id = req
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let turn_id = Uuid::new_v4().to_string();

        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(self.streaming.queue_capacity);
        let (token_tx, token_rx) = mpsc::channel::<TokenItem>(self.streaming.queue_capacity);
        let (drained_tx, drained_rx) = oneshot::channel::<()>();
        let (flushed_tx, flushed_rx) = oneshot::channel::<()>();

        let shared = Arc::new(TurnShared::new(turn_id.clone(), session_id));
        let supervisor = Arc::new(TaskSupervisor::new());

        let ctx = PipelineContext {
            shared: shared.clone(),
            event_tx,
            cancel: supervisor.cancel_token(),
            interrupt_wait: self.streaming.interrupt_wait(),
            forward_raw_tokens: self.streaming.forward_raw_tokens,
        };

        supervisor.register(
            "producer",
            tokio::spawn(run_producer(
                ctx.clone(),
                req.upstream,
                token_tx,
                drained_rx,
                flushed_rx,
            )),
        );
        supervisor.register(
            "consumer",
            tokio::spawn(run_consumer(
                ctx,
                token_rx,
                self.streaming.min_chunk_len,
                self.normalizer.clone(),
                drained_tx,
                flushed_tx,
            )),
        );

        tracing::debug!(turn_id = %turn_id, "turn started");

        self.turns.lock().insert(
            turn_id.clone(),
            TurnState {
                shared,
                event_rx: Some(event_rx),
                supervisor,
            },
        );

        turn_id
    }

    /// Claim the turn's outbound event stream. Yields events until the
    /// queue closes; lazy, finite, and not restartable — the receiver can
    /// be taken exactly once.
    pub fn stream_events(&self, turn_id: &str) -> Option<mpsc::Receiver<ServerEvent>> {
        self.turns.lock().get_mut(turn_id)?.event_rx.take()
    }

    /// Interrupt a turn. Idempotent: interrupting a terminal (or unknown)
    /// turn is a no-op and returns false.
    ///
    /// On return the turn's tasks have reached a terminal state (or were
    /// force-aborted after the bounded wait), the terminal `interrupted`
    /// event is enqueued, and both queues are closed.
    pub async fn interrupt(&self, turn_id: &str, reason: &str) -> bool {
        let (shared, supervisor) = {
            let turns = self.turns.lock();
            let Some(turn) = turns.get(turn_id) else {
                return false;
            };
            (turn.shared.clone(), turn.supervisor.clone())
        };

        if shared.status().is_terminal() {
            return false;
        }

        shared.set_interrupt_reason(reason);
        let advanced = shared.advance(TurnStatus::Interrupted);

        let clean = supervisor
            .cancel_and_wait(self.streaming.interrupt_wait())
            .await;
        if !clean {
            tracing::warn!(turn_id, reason, "turn cancellation was forced");
        }

        tracing::info!(turn_id, reason, "turn interrupted");
        advanced
    }

    /// Interrupt every non-terminal turn.
    pub async fn interrupt_all(&self, reason: &str) {
        for turn_id in self.active_turn_ids() {
            self.interrupt(&turn_id, reason).await;
        }
    }

    /// Interrupt everything and drop all turn records. Called on
    /// disconnect; the processor is unusable afterwards only by
    /// convention (a fresh connection builds a fresh processor).
    pub async fn shutdown(&self) {
        self.interrupt_all("connection_closed").await;
        let mut turns = self.turns.lock();
        for (turn_id, turn) in turns.iter() {
            if !turn.supervisor.all_finished() {
                tracing::warn!(turn_id = %turn_id, "aborting unfinished turn tasks at shutdown");
                turn.supervisor.abort_all();
            }
        }
        turns.clear();
    }

    /// Drop terminal turn records older than `cleanup_ttl`. A record whose
    /// tasks are somehow still alive is aborted now and collected on a
    /// later sweep, so no turn outlives its TTL with running tasks.
    fn cleanup_expired(&self) {
        let ttl = match chrono::Duration::from_std(self.streaming.cleanup_ttl()) {
            Ok(ttl) => ttl,
            Err(_) => return,
        };
        let now = chrono::Utc::now();

        self.turns.lock().retain(|turn_id, turn| {
            if !turn.shared.status().is_terminal() {
                return true;
            }
            let Some(finished_at) = turn.shared.finished_at() else {
                return true;
            };
            if now.signed_duration_since(finished_at) < ttl {
                return true;
            }
            if !turn.supervisor.all_finished() {
                turn.supervisor.abort_all();
                return true;
            }
            tracing::debug!(turn_id = %turn_id, "expired turn removed");
            false
        });
    }

    pub fn turn_count(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn turn_status(&self, turn_id: &str) -> Option<TurnStatus> {
        self.turns.lock().get(turn_id).map(|t| t.shared.status())
    }

    /// Ids of all non-terminal turns.
    pub fn active_turn_ids(&self) -> Vec<String> {
        self.turns
            .lock()
            .iter()
            .filter(|(_, t)| !t.shared.status().is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }
}
