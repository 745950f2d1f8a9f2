//! Long-term memory adapter: semantic memory add/search/delete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dm_domain::config::LtmServiceConfig;
use dm_domain::error::{Error, Result};

use crate::health::ServiceHealth;
use crate::http::RestClient;

#[derive(Debug, Clone, Serialize)]
pub struct MemoryAddRequest {
    pub content: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySearchRequest {
    pub query: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryAddResponse {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct LtmClient {
    rest: RestClient,
}

impl LtmClient {
    pub fn new(config: &LtmServiceConfig) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(
                "ltm",
                &config.base_url,
                config.timeout_ms,
                config.max_retries,
                config.api_key.clone(),
                Error::Memory,
            )?,
        })
    }

    /// POST /v1/memories
    pub async fn add(&self, req: &MemoryAddRequest) -> Result<MemoryAddResponse> {
        self.rest.post_json("/v1/memories", req).await
    }

    /// POST /v1/memories/search
    pub async fn search(&self, req: &MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        self.rest.post_json("/v1/memories/search", req).await
    }

    /// DELETE /v1/memories/{id}
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.rest.delete(&format!("/v1/memories/{id}")).await
    }
}

#[async_trait]
impl ServiceHealth for LtmClient {
    async fn initialize(&self) -> Result<()> {
        let (healthy, message) = self.is_healthy().await;
        if !healthy {
            tracing::warn!(service = "ltm", %message, "service not ready at startup");
        }
        Ok(())
    }

    async fn is_healthy(&self) -> (bool, String) {
        self.rest.probe_health().await
    }
}
