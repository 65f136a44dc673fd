//! HTTP sync provider
//!
//! Pushes the band's buffered transactions to the sync server with a single
//! `POST {base_url}/sync` request per attempt.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::SyncProvider;
use crate::config::ProviderConfig;
use crate::error::SyncError;

/// Sync provider talking to the sync server over HTTP
#[derive(Debug, Clone)]
pub struct HttpSyncProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpSyncProvider {
    /// Create a provider with its own reqwest client
    pub fn new(config: ProviderConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create a provider with a custom reqwest Client
    pub fn with_client(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    /// Endpoint receiving sync requests
    pub fn sync_url(&self) -> String {
        format!("{}/sync", self.config.base_url.trim_end_matches('/'))
    }

    /// `host:port` of the sync server, used as the default probe target
    pub fn probe_target(&self) -> Option<String> {
        probe_target(&self.config.base_url)
    }

    /// Get current configuration
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Derive `host:port` from a base URL
pub fn probe_target(base_url: &str) -> Option<String> {
    let url = Url::parse(base_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

#[async_trait]
impl SyncProvider for HttpSyncProvider {
    async fn is_ready(&self) -> bool {
        self.api_key().is_some()
    }

    async fn attempt_sync(&self) -> Result<(), SyncError> {
        let api_key = self.api_key().ok_or(SyncError::Unauthorized)?;
        let url = self.sync_url();

        debug!(url = %url, device_id = %self.config.device_id, "Sending sync request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "device_id": self.config.device_id,
                "mode": "device",
                "full": false,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::NetworkTimeout
                } else if e.is_connect() {
                    SyncError::ConnectionRefused
                } else {
                    SyncError::Network(e.to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => {
                debug!(url = %url, status = status.as_u16(), "Sync request accepted");
                Ok(())
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.config.rate_limit_wait_secs);

                warn!(url = %url, retry_after = wait, "Rate limited by sync server");
                Err(SyncError::RateLimited(wait))
            }
            StatusCode::NOT_FOUND => {
                debug!(url = %url, "Sync endpoint not found (404)");
                Err(SyncError::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = %url, status = ?response.status(), "Unauthorized");
                Err(SyncError::Unauthorized)
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                warn!(url = %url, "Sync server rejected payload");
                Err(SyncError::InvalidData(body))
            }
            status if status.is_server_error() => {
                warn!(url = %url, status = status.as_u16(), "Server error");
                Err(SyncError::ServerError(status.as_u16()))
            }
            status => {
                warn!(url = %url, status = status.as_u16(), "Unexpected status");
                Err(SyncError::ServerError(status.as_u16()))
            }
        }
    }
}
