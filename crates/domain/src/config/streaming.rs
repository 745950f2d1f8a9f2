use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs for the per-connection streaming runtime: queue sizes, the
/// sentence chunker, interruption deadlines, heartbeat cadence and the
/// inbound error budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Capacity of both per-turn queues (token queue and outbound event
    /// queue). A full token queue suspends the producer, which throttles
    /// consumption of the agent stream.
    #[serde(default = "d_100")]
    pub queue_capacity: usize,
    /// Minimum emitted sentence length in code points; shorter sentences
    /// merge forward until a later terminator clears the threshold.
    #[serde(default = "d_10")]
    pub min_chunk_len: usize,
    /// How long cancellation waits for a turn's tasks before force-aborting.
    #[serde(default = "d_1000")]
    pub interrupt_wait_timeout_ms: u64,
    /// Terminal turn records older than this are swept from the processor.
    #[serde(default = "d_3600")]
    pub cleanup_ttl_secs: u64,
    /// Heartbeat ping cadence.
    #[serde(default = "d_30")]
    pub ping_interval_secs: u64,
    /// Grace period past `ping_interval` before a silent peer is dropped.
    #[serde(default = "d_pong")]
    pub pong_timeout_secs: u64,
    /// Deadline for the `authorize` message after connect.
    #[serde(default = "d_30")]
    pub auth_deadline_secs: u64,
    /// Connections with no inbound traffic for this long are closed.
    #[serde(default = "d_300")]
    pub inactivity_timeout_secs: u64,
    /// Consecutive invalid inbound messages tolerated before disconnect.
    #[serde(default = "d_5")]
    pub max_error_tolerance: u32,
    /// Backoff applied after each invalid inbound message.
    #[serde(default = "d_500")]
    pub error_backoff_ms: u64,
    /// Mirror raw `stream_token` events to the client alongside
    /// `tts_ready_chunk` (typing-effect UIs). Off by default.
    #[serde(default)]
    pub forward_raw_tokens: bool,
}

impl StreamingConfig {
    pub fn interrupt_wait(&self) -> Duration {
        Duration::from_millis(self.interrupt_wait_timeout_ms)
    }

    pub fn cleanup_ttl(&self) -> Duration {
        Duration::from_secs(self.cleanup_ttl_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Full pong deadline: `ping_interval + pong_timeout`.
    pub fn pong_deadline(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.pong_timeout_secs)
    }

    pub fn auth_deadline(&self) -> Duration {
        Duration::from_secs(self.auth_deadline_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            min_chunk_len: 10,
            interrupt_wait_timeout_ms: 1000,
            cleanup_ttl_secs: 3600,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            auth_deadline_secs: 30,
            inactivity_timeout_secs: 300,
            max_error_tolerance: 5,
            error_backoff_ms: 500,
            forward_raw_tokens: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_100() -> usize {
    100
}
fn d_10() -> usize {
    10
}
fn d_1000() -> u64 {
    1000
}
fn d_3600() -> u64 {
    3600
}
fn d_30() -> u64 {
    30
}
fn d_pong() -> u64 {
    10
}
fn d_300() -> u64 {
    300
}
fn d_5() -> u32 {
    5
}
fn d_500() -> u64 {
    500
}
