/// Server-side transcode bridge, seen from the capture client
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::SignalingConfig;
use crate::error::{Result, SignalingError};

/// UDP ports the transcode worker listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePorts {
    pub audio_port: u16,
    pub video_port: u16,
}

#[async_trait]
pub trait BridgeStarter: Send + Sync {
    /// Start the worker for `livestream_id` and learn its ports.
    async fn start_bridge(&self, livestream_id: i64, egress_url: &str) -> Result<BridgePorts>;

    /// Stop the worker without ending the livestream. False when none was
    /// running.
    async fn stop_bridge(&self, livestream_id: i64) -> Result<bool>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBridgeBody<'a> {
    livestream_id: i64,
    srt_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct StopBridgeReply {
    stopped: bool,
}

/// Calls `POST {api}/api/livestream/start-bridge` and
/// `POST {api}/api/livestream/{id}/stop-bridge`.
#[derive(Clone)]
pub struct HttpBridgeClient {
    client: Client,
    api_url: String,
}

impl HttpBridgeClient {
    pub fn new(config: &SignalingConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_url: config.bridge_api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BridgeStarter for HttpBridgeClient {
    async fn start_bridge(&self, livestream_id: i64, egress_url: &str) -> Result<BridgePorts> {
        let response = self
            .client
            .post(format!("{}/api/livestream/start-bridge", self.api_url))
            .json(&StartBridgeBody {
                livestream_id,
                srt_url: egress_url,
            })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<BridgePorts>().await?),
            StatusCode::CONFLICT => Err(SignalingError::BridgeAlreadyRunning(livestream_id)),
            _ => Err(status_error(response).await),
        }
    }

    async fn stop_bridge(&self, livestream_id: i64) -> Result<bool> {
        let response = self
            .client
            .post(format!(
                "{}/api/livestream/{}/stop-bridge",
                self.api_url, livestream_id
            ))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response.json::<StopBridgeReply>().await?.stopped)
    }
}

async fn status_error(response: reqwest::Response) -> SignalingError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    SignalingError::HttpStatus { status, body }
}
