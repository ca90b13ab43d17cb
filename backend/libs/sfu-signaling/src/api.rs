//! Janus HTTP transport
//!
//! `POST /janus` creates a session, `POST /janus/{session}` attaches or
//! destroys, `POST /janus/{session}/{handle}` talks to the plugin and
//! `GET /janus/{session}?maxev=N` is the long-poll event channel.
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::SignalingConfig;
use crate::error::{Result, SignalingError};
use crate::protocol::{IceCandidate, JanusMessage, Jsep, PollReply, ERROR_SESSION_NOT_FOUND};

#[async_trait]
pub trait JanusApi: Send + Sync {
    /// New session id
    async fn create_session(&self) -> Result<u64>;

    /// New handle id on `session_id` for `plugin`
    async fn attach(&self, session_id: u64, plugin: &str) -> Result<u64>;

    /// Plugin request. The reply is either the synchronous result or an `ack`
    /// whose outcome arrives on the event channel.
    async fn message(
        &self,
        session_id: u64,
        handle_id: u64,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Result<JanusMessage>;

    /// One local candidate, or the end-of-candidates marker when `None`.
    async fn trickle(
        &self,
        session_id: u64,
        handle_id: u64,
        candidate: Option<IceCandidate>,
    ) -> Result<()>;

    /// Blocks until events are queued or the SFU's keepalive window closes.
    async fn poll(&self, session_id: u64, max_events: u32) -> Result<Vec<JanusMessage>>;

    /// Ends the session. A session the SFU no longer knows counts as destroyed.
    async fn destroy(&self, session_id: u64) -> Result<()>;
}

fn transaction_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct HttpJanusApi {
    client: Client,
    base_url: String,
}

impl HttpJanusApi {
    pub fn new(config: &SignalingConfig) -> Result<Self> {
        // Long-poll requests are held open by the SFU, so the client timeout
        // must outlast its keepalive window.
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.janus_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, mut body: Value) -> Result<JanusMessage> {
        body["transaction"] = Value::String(transaction_id());

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SignalingError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<JanusMessage>().await?)
    }
}

#[async_trait]
impl JanusApi for HttpJanusApi {
    async fn create_session(&self) -> Result<u64> {
        let reply = self
            .post("", json!({ "janus": "create" }))
            .await?
            .check("create")?;
        let session_id = reply.id("create")?;
        debug!(session_id, "Janus session created");
        Ok(session_id)
    }

    async fn attach(&self, session_id: u64, plugin: &str) -> Result<u64> {
        let reply = self
            .post(
                &format!("/{}", session_id),
                json!({ "janus": "attach", "plugin": plugin }),
            )
            .await?
            .check("attach")?;
        let handle_id = reply.id("attach")?;
        debug!(session_id, handle_id, plugin, "Attached to plugin");
        Ok(handle_id)
    }

    async fn message(
        &self,
        session_id: u64,
        handle_id: u64,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Result<JanusMessage> {
        let mut request = json!({ "janus": "message", "body": body });
        if let Some(jsep) = jsep {
            request["jsep"] = serde_json::to_value(jsep).unwrap_or(Value::Null);
        }
        self.post(&format!("/{}/{}", session_id, handle_id), request)
            .await
    }

    async fn trickle(
        &self,
        session_id: u64,
        handle_id: u64,
        candidate: Option<IceCandidate>,
    ) -> Result<()> {
        let candidate = match candidate {
            Some(candidate) => serde_json::to_value(candidate).unwrap_or(Value::Null),
            None => json!({ "completed": true }),
        };
        self.post(
            &format!("/{}/{}", session_id, handle_id),
            json!({ "janus": "trickle", "candidate": candidate }),
        )
        .await?
        .check("trickle")?;
        Ok(())
    }

    async fn poll(&self, session_id: u64, max_events: u32) -> Result<Vec<JanusMessage>> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, session_id))
            .query(&[("maxev", max_events.to_string()), ("rid", transaction_id())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SignalingError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let messages = response.json::<PollReply>().await?.into_vec();
        // A core error here means the session itself is gone.
        if let Some(error) = messages.iter().find_map(|m| m.error.as_ref()) {
            return Err(SignalingError::SessionClosed(format!(
                "{} (code {})",
                error.reason, error.code
            )));
        }
        Ok(messages)
    }

    async fn destroy(&self, session_id: u64) -> Result<()> {
        let reply = self
            .post(&format!("/{}", session_id), json!({ "janus": "destroy" }))
            .await?;

        if reply.error.as_ref().map(|e| e.code) == Some(ERROR_SESSION_NOT_FOUND) {
            debug!(session_id, "Janus session already gone");
            return Ok(());
        }
        reply.check("destroy")?;
        debug!(session_id, "Janus session destroyed");
        Ok(())
    }
}
