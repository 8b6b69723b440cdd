//! Stub live connector.
//!
//! Fetches one snapshot per match from a local stub source over HTTP.
//! Only constructed when the run policy allows live IO
//! (`LIVE_IO_ALLOWED` and `REAL_PROVIDER_LIVE` both set); the connector
//! registry enforces that gate. Every request carries a client-level
//! timeout so no fetch blocks indefinitely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;
use tracing::debug;

use super::{RawSnapshot, SnapshotSource};

/// Connector name used in requests and report audit fields.
pub const LIVE_CONNECTOR: &str = "stub_live";

pub struct LiveSourceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl LiveSourceClient {
    /// Build a client with a hard request timeout. The API key, when
    /// present, is sent as `x-api-key` and never logged.
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client for live source")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(Secret::new),
        })
    }
}

#[async_trait]
impl SnapshotSource for LiveSourceClient {
    async fn fetch(&self, match_id: &str) -> Result<Option<RawSnapshot>> {
        let url = format!("{}/matches/{}/snapshot", self.base_url, match_id);
        debug!(%url, "Fetching live snapshot");

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Live source request failed: {url}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("Live source returned error status: {url}"))?;

        let value: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Live source returned non-JSON body: {url}"))?;

        let raw = RawSnapshot::from_json(value)
            .map_err(|e| anyhow::anyhow!("Live snapshot rejected: {e}"))?;
        Ok(Some(raw))
    }

    fn name(&self) -> &str {
        LIVE_CONNECTOR
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_and_trims_base_url() {
        let client = LiveSourceClient::new("http://127.0.0.1:9090/", None, 5).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:9090");
        assert_eq!(client.name(), LIVE_CONNECTOR);
        assert!(client.is_live());
    }

    #[test]
    fn test_client_holds_api_key_without_display() {
        let client =
            LiveSourceClient::new("http://127.0.0.1:9090", Some("sekrit".into()), 5).unwrap();
        // Debug output of the secret must not leak the key material.
        assert!(!format!("{:?}", client.api_key).contains("sekrit"));
    }
}
