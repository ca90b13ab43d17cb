/// Streaming CDN client (Livepeer-style REST API)
///
/// Provisions an ingest stream per livestream, answers "is media arriving?"
/// and deletes the stream once the session is over. Delivery URLs are derived
/// locally from the stream key and playback id.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use resilience::{with_retry, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CdnConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("CDN request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("CDN returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("CDN stream {0} not found")]
    NotFound(String),
}

/// Ingest credentials returned when a stream is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedStream {
    pub id: String,
    pub stream_key: String,
    pub playback_id: Option<String>,
    pub rtmp_ingest_url: Option<String>,
}

#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// `POST /stream`. Not retried.
    async fn create_stream(&self, name: &str) -> Result<ProvisionedStream, ProviderError>;

    /// `GET /stream/{id}` -> `isActive`
    async fn is_stream_active(&self, stream_id: &str) -> Result<bool, ProviderError>;

    /// `DELETE /stream/{id}`; a stream that is already gone counts as deleted.
    async fn delete_stream(&self, stream_id: &str) -> Result<(), ProviderError>;
}

/// Where media goes in and comes out.
#[derive(Debug, Clone)]
pub struct DeliveryEndpoints {
    pub srt_host: String,
    pub srt_port: u16,
    pub hls_base_url: String,
}

impl DeliveryEndpoints {
    pub fn from_config(config: &CdnConfig) -> Self {
        Self {
            srt_host: config.srt_host.clone(),
            srt_port: config.srt_port,
            hls_base_url: config.hls_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Egress URL the transcode worker pushes MPEG-TS to.
    pub fn srt_url(&self, stream_key: &str) -> String {
        format!(
            "srt://{}:{}?streamid={}",
            self.srt_host, self.srt_port, stream_key
        )
    }

    pub fn hls_url(&self, playback_id: &str) -> String {
        format!("{}/hls/{}/index.m3u8", self.hls_base_url, playback_id)
    }
}

#[derive(Debug, Serialize)]
struct CreateStreamRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamState {
    #[serde(default)]
    is_active: bool,
}

#[derive(Clone)]
pub struct LivepeerClient {
    client: Client,
    api_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl LivepeerClient {
    pub fn new(config: &CdnConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_secs(2),
                ..Default::default()
            },
        })
    }

    /// Override the retry policy used for idempotent calls.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn stream_url(&self, stream_id: &str) -> String {
        format!("{}/stream/{}", self.api_url, stream_id)
    }

    async fn fetch_state(&self, stream_id: &str) -> Result<StreamState, ProviderError> {
        let response = self
            .client
            .get(self.stream_url(stream_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<StreamState>().await?),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(stream_id.to_string())),
            status => Err(status_error(status, response).await),
        }
    }

    async fn delete_once(&self, stream_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.stream_url(stream_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(%stream_id, "CDN stream already deleted");
                Ok(())
            }
            status => Err(status_error(status, response).await),
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> ProviderError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ProviderError::Status {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl StreamProvider for LivepeerClient {
    async fn create_stream(&self, name: &str) -> Result<ProvisionedStream, ProviderError> {
        let response = self
            .client
            .post(format!("{}/stream", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&CreateStreamRequest { name })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = status_error(status, response).await;
            warn!(error = %err, "CDN stream provisioning rejected");
            return Err(err);
        }

        let stream = response.json::<ProvisionedStream>().await?;
        info!(stream_id = %stream.id, "CDN stream provisioned");
        Ok(stream)
    }

    async fn is_stream_active(&self, stream_id: &str) -> Result<bool, ProviderError> {
        with_retry(self.retry.clone(), || self.fetch_state(stream_id))
            .await
            .map(|state| state.is_active)
            .map_err(|e| e.into_inner())
    }

    async fn delete_stream(&self, stream_id: &str) -> Result<(), ProviderError> {
        with_retry(self.retry.clone(), || self.delete_once(stream_id))
            .await
            .map_err(|e| e.into_inner())?;
        info!(%stream_id, "CDN stream deleted");
        Ok(())
    }
}
