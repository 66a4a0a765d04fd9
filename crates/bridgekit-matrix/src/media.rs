//! Fetching remote media before it is re-uploaded to the chat network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{BridgeError, Result};

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// [`MediaFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::DownloadFailed {
                url: String::new(),
                reason: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let download_failed = |reason: String| BridgeError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| download_failed(e.to_string()))?;

        let data = response
            .bytes()
            .await
            .map_err(|e| download_failed(format!("failed to read body: {e}")))?;

        debug!(url = %url, size = data.len(), "Downloaded media");
        Ok(data)
    }
}
