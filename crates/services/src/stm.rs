//! Short-term memory adapter: session records and per-session chat
//! history. Conversation resumption is driven entirely by the
//! `session_id` the client supplies; the gateway holds no history itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dm_domain::config::StmServiceConfig;
use dm_domain::error::{Error, Result};

use crate::health::ServiceHealth;
use crate::http::RestClient;

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageRecord {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StmClient {
    rest: RestClient,
}

impl StmClient {
    pub fn new(config: &StmServiceConfig) -> Result<Self> {
        Ok(Self {
            rest: RestClient::new(
                "stm",
                &config.base_url,
                config.timeout_ms,
                config.max_retries,
                config.api_key.clone(),
                Error::Memory,
            )?,
        })
    }

    /// POST /v1/sessions
    pub async fn create_session(&self, req: &CreateSessionRequest) -> Result<SessionRecord> {
        self.rest.post_json("/v1/sessions", req).await
    }

    /// GET /v1/sessions/{id}
    pub async fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        self.rest
            .get_json(&format!("/v1/sessions/{session_id}"))
            .await
    }

    /// GET /v1/sessions?user_id=...
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        self.rest
            .get_json(&format!("/v1/sessions?user_id={user_id}"))
            .await
    }

    /// PATCH /v1/sessions/{id}
    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<SessionRecord> {
        self.rest
            .patch_json(
                &format!("/v1/sessions/{session_id}"),
                &serde_json::json!({ "title": title }),
            )
            .await
    }

    /// DELETE /v1/sessions/{id}
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.rest
            .delete(&format!("/v1/sessions/{session_id}"))
            .await
    }

    /// GET /v1/sessions/{id}/messages
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        self.rest
            .get_json(&format!("/v1/sessions/{session_id}/messages"))
            .await
    }
}

#[async_trait]
impl ServiceHealth for StmClient {
    async fn initialize(&self) -> Result<()> {
        let (healthy, message) = self.is_healthy().await;
        if !healthy {
            tracing::warn!(service = "stm", %message, "service not ready at startup");
        }
        Ok(())
    }

    async fn is_healthy(&self) -> (bool, String) {
        self.rest.probe_health().await
    }
}
