use std::sync::Arc;

use dm_domain::config::Config;
use dm_services::{AgentProvider, LtmClient, StmClient, TtsClient, VlmClient};
use dm_speech::TextNormalizer;

use crate::assets::AssetCatalog;
use crate::tokens::TokenGate;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config and the external service singletons
/// - **Streaming** — the normalizer shared by every turn pipeline and the
///   process-wide connection registry
/// - **Security** — startup-built token gates (open = dev mode)
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub agent: Arc<dyn AgentProvider>,
    pub tts: Arc<TtsClient>,
    pub vlm: Arc<VlmClient>,
    pub stm: Arc<StmClient>,
    pub ltm: Arc<LtmClient>,

    // ── Streaming ─────────────────────────────────────────────────────
    pub normalizer: Arc<TextNormalizer>,
    pub connections: Arc<ConnectionRegistry>,
    pub assets: Arc<AssetCatalog>,

    // ── Security (startup-built) ──────────────────────────────────────
    /// Gate for the REST surface (bearer header).
    pub api_gate: TokenGate,
    /// Gate for the stream `authorize` handshake.
    pub client_gate: TokenGate,
}
