//! HTTP client binding.

use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use onecat_core::{HttpClientConfig, TransportError, TransportResult};

/// A bound HTTP client with a pooled connection to the gateway.
#[derive(Debug, Clone)]
pub struct HttpClientBinding {
    config: HttpClientConfig,
    client: Client,
}

impl HttpClientBinding {
    /// Creates the binding and its connection pool.
    pub fn new(config: HttpClientConfig) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        info!(name = %config.name, url = %config.http_url(), "HTTP client binding created");

        Ok(Self { config, client })
    }

    /// The binding configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The HTTP base URL.
    pub fn http_url(&self) -> String {
        self.config.http_url()
    }

    /// The companion WebSocket URL, if enabled.
    pub fn ws_url(&self) -> Option<String> {
        self.config.ws_url()
    }

    /// Posts a JSON body to `path` and returns the decoded JSON response.
    pub async fn post_json(&self, path: &str, body: &Value) -> TransportResult<Value> {
        let url = format!(
            "{}{}",
            self.http_url().trim_end_matches('/'),
            onecat_core::binding::normalize_path(path)
        );

        let mut req = self.client.post(&url).json(body);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        debug!(name = %self.config.name, url = %url, "POST");

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::connection(&url, e))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Auth {
                reason: format!("HTTP {} from {url}", status.as_u16()),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::connection(
                &url,
                format!("HTTP {} error: {}", status.as_u16(), text),
            ));
        }

        resp.json().await.map_err(|e| TransportError::Decode {
            what: "HTTP response",
            reason: e.to_string(),
        })
    }
}
