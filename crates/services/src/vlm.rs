//! Vision-language model adapter: single-shot image analysis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dm_domain::config::VlmServiceConfig;
use dm_domain::error::{Error, Result};

use crate::health::ServiceHealth;
use crate::http::RestClient;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    /// Base64 data or a URL the service can fetch.
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzeResponse {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct VlmClient {
    rest: RestClient,
}

impl VlmClient {
    pub fn new(config: &VlmServiceConfig) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(
                "vlm",
                &config.base_url,
                config.timeout_ms,
                config.max_retries,
                config.api_key.clone(),
                Error::Vlm,
            )?,
        })
    }

    /// Describe an image (POST /v1/analyze).
    pub async fn analyze(&self, image: &str, prompt: Option<&str>) -> Result<AnalyzeResponse> {
        let req = AnalyzeRequest {
            image: image.to_owned(),
            prompt: prompt.map(str::to_owned),
        };
        self.rest.post_json("/v1/analyze", &req).await
    }
}

#[async_trait]
impl ServiceHealth for VlmClient {
    async fn initialize(&self) -> Result<()> {
        let (healthy, message) = self.is_healthy().await;
        if !healthy {
            tracing::warn!(service = "vlm", %message, "service not ready at startup");
        }
        Ok(())
    }

    async fn is_healthy(&self) -> (bool, String) {
        self.rest.probe_health().await
    }
}
