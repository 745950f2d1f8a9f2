//! Shared REST plumbing for the request/response adapters: header
//! decoration, full-URL building, and retry + exponential back-off on
//! transient (5xx / timeout) failures. 4xx responses are permanent and
//! never retried.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

use dm_domain::error::{Error, Result};

/// A reqwest wrapper with the DeskMate request conventions baked in.
///
/// Created once per service at startup; the underlying `reqwest::Client`
/// maintains a connection pool.
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    /// Service label used in tracing records.
    service: &'static str,
    /// Maps an error message into the service's `Error` variant.
    wrap: fn(String) -> Error,
}

impl RestClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        timeout_ms: u64,
        max_retries: u32,
        api_key: Option<String>,
        wrap: fn(String) -> Error,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            max_retries,
            service,
            wrap,
        })
    }

    /// Build the full URL for a path like `/v1/sessions`.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decorate a `RequestBuilder` with the standard gateway headers.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let trace_id = Uuid::new_v4().to_string();
        let mut rb = rb
            .header("X-Client-Type", "deskmate-gateway")
            .header("X-Trace-Id", trace_id);
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    /// Execute a request with retry + exponential back-off.
    ///
    /// * Retries on 5xx status codes and transport timeouts.
    /// * Does **not** retry on 4xx (client errors are permanent).
    /// * Emits one tracing record per attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    tracing::debug!(
                        service = self.service,
                        endpoint,
                        status,
                        duration_ms,
                        "service call"
                    );

                    if resp.status().is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some((self.wrap)(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_client_error() {
                        let resp_status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        if resp_status == StatusCode::UNAUTHORIZED
                            || resp_status == StatusCode::FORBIDDEN
                        {
                            return Err(Error::Auth(format!(
                                "{endpoint} auth failed ({status}): {body}"
                            )));
                        }
                        return Err((self.wrap)(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) if e.is_timeout() => {
                    tracing::debug!(
                        service = self.service,
                        endpoint,
                        duration_ms,
                        "service call timed out"
                    );
                    last_err = Some(Error::Timeout(format!("{endpoint}: {e}")));
                    continue;
                }
                Err(e) => return Err(Error::Http(format!("{endpoint}: {e}"))),
            }
        }

        Err(last_err
            .unwrap_or_else(|| (self.wrap)(format!("{endpoint}: retries exhausted"))))
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .execute_with_retry(path, || self.http.get(self.url(path)))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| (self.wrap)(format!("{path}: invalid response body: {e}")))
    }

    pub async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .execute_with_retry(path, || self.http.post(self.url(path)).json(body))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| (self.wrap)(format!("{path}: invalid response body: {e}")))
    }

    pub async fn patch_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .execute_with_retry(path, || self.http.patch(self.url(path)).json(body))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| (self.wrap)(format!("{path}: invalid response body: {e}")))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute_with_retry(path, || self.http.delete(self.url(path)))
            .await?;
        Ok(())
    }

    /// GET `/health` and fold the outcome into `(healthy, message)`.
    pub async fn probe_health(&self) -> (bool, String) {
        match self
            .execute_with_retry("/health", || self.http.get(self.url("/health")))
            .await
        {
            Ok(_) => (true, format!("{} reachable", self.service)),
            Err(e) => (false, e.to_string()),
        }
    }
}
