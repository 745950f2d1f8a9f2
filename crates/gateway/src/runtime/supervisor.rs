//! Background-task supervision for one turn.
//!
//! Every task spawned on behalf of a turn is registered here. Cancellation
//! is cooperative — tasks observe the shared token at their next
//! suspension point — and bounded: `cancel_and_wait` never blocks past its
//! deadline, force-aborting and logging any straggler.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Registry + cancellation scope for a turn's tasks.
pub struct TaskSupervisor {
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The token the turn's tasks select on.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record a spawned task under a label used in logs.
    pub fn register(&self, label: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((label, handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// True when every registered task has reached a terminal state.
    /// Vacuously true after the handles were reaped by a wait call.
    pub fn all_finished(&self) -> bool {
        self.tasks.lock().iter().all(|(_, h)| h.is_finished())
    }

    /// Force-abort everything still registered.
    pub fn abort_all(&self) {
        for (label, handle) in self.tasks.lock().iter() {
            if !handle.is_finished() {
                tracing::warn!(task = label, "force-aborting task");
                handle.abort();
            }
        }
    }

    /// Request cancellation and wait for all tasks under one group
    /// deadline. Returns true when every task stopped on its own; tasks
    /// that miss the deadline are aborted and reported.
    pub async fn cancel_and_wait(&self, wait: Duration) -> bool {
        self.cancel.cancel();
        self.wait_idle(wait).await
    }

    /// Await all registered tasks under one deadline without cancelling
    /// first (used on the natural completion path).
    pub async fn wait_idle(&self, wait: Duration) -> bool {
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        let deadline = Instant::now() + wait;
        let mut clean = true;

        for (label, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(task = label, error = %e, "task panicked");
                    clean = false;
                }
                Ok(Err(_)) => {
                    // Aborted elsewhere — already terminal.
                }
                Err(_) => {
                    tracing::warn!(
                        task = label,
                        wait_ms = wait.as_millis() as u64,
                        "task did not stop within the cancellation window; aborting"
                    );
                    handle.abort();
                    clean = false;
                }
            }
        }

        clean
    }
}
