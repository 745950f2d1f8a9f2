//! TTS service adapter. The gateway itself never synthesizes audio — it
//! marks text synthesis-ready over the stream channel — but clients call
//! the REST proxy backed by this adapter out of band.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dm_domain::config::TtsServiceConfig;
use dm_domain::error::{Error, Result};

use crate::health::ServiceHealth;
use crate::http::RestClient;

#[derive(Debug, Clone, Serialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesizeResponse {
    /// Base64-encoded audio payload.
    pub audio: String,
    /// Container format, e.g. "wav" or "mp3".
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct TtsClient {
    rest: RestClient,
    default_voice: Option<String>,
}

impl TtsClient {
    pub fn new(config: &TtsServiceConfig) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(
                "tts",
                &config.base_url,
                config.timeout_ms,
                config.max_retries,
                config.api_key.clone(),
                Error::Tts,
            )?,
            default_voice: config.default_voice.clone(),
        })
    }

    /// Synthesize one utterance (POST /v1/synthesize).
    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizeResponse> {
        let req = SynthesizeRequest {
            text: text.to_owned(),
            voice: voice
                .map(str::to_owned)
                .or_else(|| self.default_voice.clone()),
        };
        self.rest.post_json("/v1/synthesize", &req).await
    }
}

#[async_trait]
impl ServiceHealth for TtsClient {
    async fn initialize(&self) -> Result<()> {
        let (healthy, message) = self.is_healthy().await;
        if !healthy {
            tracing::warn!(service = "tts", %message, "service not ready at startup");
        }
        Ok(())
    }

    async fn is_healthy(&self) -> (bool, String) {
        self.rest.probe_health().await
    }
}
