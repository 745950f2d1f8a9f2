use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentServiceConfig {
    /// Base URL of the agent engine.
    #[serde(default = "d_agent_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds (connect + headers; the body
    /// streams for the life of the turn).
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
    /// Optional API key sent as `X-Api-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AgentServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_agent_url(),
            timeout_ms: d_timeout(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsServiceConfig {
    #[serde(default = "d_tts_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Default voice when the request does not name one.
    #[serde(default)]
    pub default_voice: Option<String>,
}

impl Default for TtsServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_tts_url(),
            timeout_ms: d_timeout(),
            max_retries: d_retries(),
            api_key: None,
            default_voice: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmServiceConfig {
    #[serde(default = "d_vlm_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for VlmServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_vlm_url(),
            timeout_ms: d_timeout(),
            max_retries: d_retries(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmServiceConfig {
    #[serde(default = "d_stm_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for StmServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_stm_url(),
            timeout_ms: d_timeout(),
            max_retries: d_retries(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtmServiceConfig {
    #[serde(default = "d_ltm_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LtmServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_ltm_url(),
            timeout_ms: d_timeout(),
            max_retries: d_retries(),
            api_key: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_agent_url() -> String {
    "http://127.0.0.1:8100".into()
}
fn d_tts_url() -> String {
    "http://127.0.0.1:8101".into()
}
fn d_vlm_url() -> String {
    "http://127.0.0.1:8102".into()
}
fn d_stm_url() -> String {
    "http://127.0.0.1:8103".into()
}
fn d_ltm_url() -> String {
    "http://127.0.0.1:8104".into()
}
fn d_timeout() -> u64 {
    30_000
}
fn d_retries() -> u32 {
    2
}
