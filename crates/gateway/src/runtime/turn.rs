//! Per-turn records: the status state machine, the shared cell the
//! pipeline tasks write through, and the owning [`TurnState`] entry kept
//! in the processor's turn map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use dm_protocol::ServerEvent;

use super::supervisor::TaskSupervisor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn lifecycle. Transitions only move forward; a terminal status never
/// reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Pending,
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnStatus::Completed | TurnStatus::Interrupted | TurnStatus::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            TurnStatus::Pending => 0,
            TurnStatus::Running => 1,
            TurnStatus::Completed | TurnStatus::Interrupted | TurnStatus::Failed => 2,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared cell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State shared between the processor and the turn's pipeline tasks.
///
/// Tasks carry only this `Arc` plus the ids; they never hold references
/// back into the processor's turn map.
pub struct TurnShared {
    pub turn_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    status: Mutex<TurnStatus>,
    interrupt_reason: Mutex<Option<String>>,
    /// Whether `stream_start` reached the event queue. A turn that ends
    /// before the agent's opening event gets a synthesized one, so the
    /// terminal event is never the turn's first.
    started: AtomicBool,
    /// Response text reconstructed from tokens; overwritten by the
    /// upstream `stream_end` content when that is non-empty.
    aggregate: Mutex<String>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl TurnShared {
    pub fn new(turn_id: String, session_id: String) -> Self {
        Self {
            turn_id,
            session_id,
            created_at: Utc::now(),
            status: Mutex::new(TurnStatus::Pending),
            interrupt_reason: Mutex::new(None),
            started: AtomicBool::new(false),
            aggregate: Mutex::new(String::new()),
            finished_at: Mutex::new(None),
        }
    }

    /// Record that the opening `stream_start` was enqueued.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TurnStatus {
        *self.status.lock()
    }

    /// Advance the status. Returns false (and leaves the status untouched)
    /// when the transition would move backwards or reopen a terminal turn.
    pub fn advance(&self, to: TurnStatus) -> bool {
        let mut status = self.status.lock();
        if to.rank() <= status.rank() {
            return false;
        }
        *status = to;
        if to.is_terminal() {
            *self.finished_at.lock() = Some(Utc::now());
        }
        true
    }

    /// Record the interruption reason. The first writer wins so a
    /// connection-level shutdown cannot overwrite a client request.
    pub fn set_interrupt_reason(&self, reason: &str) {
        let mut slot = self.interrupt_reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_owned());
        }
    }

    pub fn interrupt_reason(&self) -> String {
        self.interrupt_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "cancelled".to_owned())
    }

    pub fn append_content(&self, fragment: &str) {
        self.aggregate.lock().push_str(fragment);
    }

    pub fn set_content(&self, content: String) {
        *self.aggregate.lock() = content;
    }

    pub fn content(&self) -> String {
        self.aggregate.lock().clone()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queues + map entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Items on the token queue between producer and consumer. `Done` is the
/// end-of-tokens sentinel: nothing follows it.
#[derive(Debug)]
pub enum TokenItem {
    Chunk(String),
    Done,
}

/// One entry in the processor's turn map. Owns the outbound receiver
/// until a reader claims it, and the supervisor owning both tasks.
pub struct TurnState {
    pub shared: Arc<TurnShared>,
    /// Taken exactly once by `stream_events`; the stream is not
    /// restartable.
    pub event_rx: Option<mpsc::Receiver<ServerEvent>>,
    pub supervisor: Arc<TaskSupervisor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        assert_eq!(shared.status(), TurnStatus::Pending);

        assert!(shared.advance(TurnStatus::Running));
        assert!(shared.advance(TurnStatus::Completed));
        assert_eq!(shared.status(), TurnStatus::Completed);

        // Terminal never reopens or changes.
        assert!(!shared.advance(TurnStatus::Running));
        assert!(!shared.advance(TurnStatus::Interrupted));
        assert!(!shared.advance(TurnStatus::Failed));
        assert_eq!(shared.status(), TurnStatus::Completed);
    }

    #[test]
    fn pending_can_jump_straight_to_terminal() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        assert!(shared.advance(TurnStatus::Failed));
        assert!(shared.status().is_terminal());
        assert!(shared.finished_at().is_some());
    }

    #[test]
    fn finished_at_set_only_on_terminal() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        shared.advance(TurnStatus::Running);
        assert!(shared.finished_at().is_none());
        shared.advance(TurnStatus::Interrupted);
        assert!(shared.finished_at().is_some());
    }

    #[test]
    fn first_interrupt_reason_wins() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        shared.set_interrupt_reason("client_requested");
        shared.set_interrupt_reason("connection_closed");
        assert_eq!(shared.interrupt_reason(), "client_requested");
    }

    #[test]
    fn default_interrupt_reason() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        assert_eq!(shared.interrupt_reason(), "cancelled");
    }

    #[test]
    fn started_flag_is_sticky() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        assert!(!shared.has_started());
        shared.mark_started();
        assert!(shared.has_started());
        shared.mark_started();
        assert!(shared.has_started());
    }

    #[test]
    fn content_aggregation_and_override() {
        let shared = TurnShared::new("t1".into(), "s1".into());
        shared.append_content("Hello");
        shared.append_content(" there.");
        assert_eq!(shared.content(), "Hello there.");
        shared.set_content("authoritative".into());
        assert_eq!(shared.content(), "authoritative");
    }
}
