/// Livestream session orchestrator
///
/// Ties the persisted session (store), the CDN stream (provider) and the
/// transcode worker (bridge) together. Every path that ends a session goes
/// through `finalize_session`, whose store write is guarded so only the first
/// caller records the end time and releases the CDN stream.
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::db::LivestreamStore;
use crate::error::{AppError, Result};
use crate::models::{
    ActiveLivestreams, CreateAndStartRequest, CreateAndStartResponse, EndLivestreamResponse,
    FeaturedProduct, Livestream, LivestreamDetails, LivestreamStatus, NewLivestream,
    SellerHistory, StartBridgeRequest, StopBridgeResponse, StreamStatusResponse,
    ViewerCountResponse,
};
use crate::services::bridge::{BridgePorts, BridgeSupervisor, WorkerExit};
use crate::services::cdn::{DeliveryEndpoints, StreamProvider};
use crate::services::webhook::WebhookEvent;

/// What a verified webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// The transition had already happened (e.g. idle after a client end)
    AlreadyApplied,
    UnknownStream,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::UnknownStream => "unknown_stream",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct LivestreamService {
    store: Arc<dyn LivestreamStore>,
    provider: Arc<dyn StreamProvider>,
    bridge: BridgeSupervisor,
    endpoints: DeliveryEndpoints,
}

impl LivestreamService {
    pub fn new(
        store: Arc<dyn LivestreamStore>,
        provider: Arc<dyn StreamProvider>,
        bridge: BridgeSupervisor,
        endpoints: DeliveryEndpoints,
    ) -> Self {
        Self {
            store,
            provider,
            bridge,
            endpoints,
        }
    }

    pub fn bridge(&self) -> &BridgeSupervisor {
        &self.bridge
    }

    async fn load(&self, livestream_id: i64) -> Result<Livestream> {
        self.store
            .get(livestream_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("livestream {}", livestream_id)))
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Provision a CDN stream and persist a live session with its featured
    /// products. Nothing is persisted when provisioning fails.
    pub async fn create_and_start(
        &self,
        req: CreateAndStartRequest,
    ) -> Result<CreateAndStartResponse> {
        let title = req
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let (seller_id, title) = match (req.seller_id, title) {
            (Some(seller_id), Some(title)) => (seller_id, title.to_string()),
            (seller_id, title) => {
                let mut missing = Vec::new();
                if seller_id.is_none() {
                    missing.push("sellerId");
                }
                if title.is_none() {
                    missing.push("title");
                }
                return Err(AppError::MissingParameters(missing.join(", ")));
            }
        };
        req.validate()?;

        let stream = self.provider.create_stream(&title).await?;
        let srt_url = self.endpoints.srt_url(&stream.stream_key);
        let hls_url = stream
            .playback_id
            .as_deref()
            .map(|pb| self.endpoints.hls_url(pb));

        let new = NewLivestream {
            seller_id,
            title,
            description: req.description,
            thumbnail_url: req.thumbnail_url,
            stream_id: stream.id.clone(),
            stream_key: stream.stream_key.clone(),
            rtmp_url: stream.rtmp_ingest_url.clone(),
            hls_url: hls_url.clone(),
        };

        let row = match self.store.create_with_products(&new, &req.product_ids).await {
            Ok(row) => row,
            Err(e) => {
                // Don't leave an orphaned stream at the CDN.
                if let Err(cleanup) = self.provider.delete_stream(&stream.id).await {
                    warn!(stream_id = %stream.id, error = %cleanup, "Failed to release CDN stream after insert error");
                }
                return Err(e);
            }
        };

        info!(
            livestream_id = row.livestream_id,
            seller_id,
            stream_id = %stream.id,
            products = req.product_ids.len(),
            "Livestream created and started"
        );

        Ok(CreateAndStartResponse {
            livestream_id: row.livestream_id,
            stream_key: stream.stream_key,
            srt_url,
            rtmp_url: row.rtmp_url,
            hls_url: row.hls_url,
        })
    }

    /// Spawn the transcode worker for an existing session that has not ended.
    pub async fn start_bridge(&self, req: StartBridgeRequest) -> Result<BridgePorts> {
        let srt_url = req.srt_url.as_deref().filter(|u| !u.trim().is_empty());
        let (livestream_id, srt_url) = match (req.livestream_id, srt_url) {
            (Some(id), Some(url)) => (id, url),
            _ => {
                return Err(AppError::MissingParameters(
                    "livestreamId, srtUrl".to_string(),
                ))
            }
        };

        let row = self.load(livestream_id).await?;
        if row.status == LivestreamStatus::Ended {
            return Err(AppError::BadRequest(format!(
                "livestream {} has ended",
                livestream_id
            )));
        }

        let ports = self
            .bridge
            .start(livestream_id, srt_url, req.audio_port, req.video_port)?;
        Ok(ports)
    }

    /// Stop the worker but leave the session open, so a failed publish
    /// attempt can start a fresh one.
    pub fn stop_bridge(&self, livestream_id: i64) -> StopBridgeResponse {
        let stopped = self.bridge.stop(livestream_id);
        if stopped {
            info!(livestream_id, "Bridge stopped, session kept open");
        } else {
            debug!(livestream_id, "No transcode worker to stop");
        }
        StopBridgeResponse {
            livestream_id,
            stopped,
        }
    }

    /// Stop the bridge and finalize the session. Calling it again returns the
    /// duration and stats recorded by the first call.
    pub async fn end(&self, livestream_id: i64) -> Result<EndLivestreamResponse> {
        if !self.bridge.stop(livestream_id) {
            debug!(livestream_id, "No transcode worker to stop on end");
        }

        let mut row = self.load(livestream_id).await?;
        if row.status != LivestreamStatus::Ended {
            self.finalize_session(&row, "client_end").await?;
            row = self.load(livestream_id).await?;
        }

        Ok(EndLivestreamResponse {
            duration_seconds: row.duration_seconds.unwrap_or(0),
            stats: row.stats(),
        })
    }

    /// Guarded transition to `ended`. Returns whether this call performed it;
    /// only that caller releases the CDN stream.
    async fn finalize_session(&self, row: &Livestream, cause: &'static str) -> Result<bool> {
        let finalized = self.store.finalize(row.livestream_id, Utc::now()).await?;
        if !finalized {
            debug!(livestream_id = row.livestream_id, cause, "Livestream already ended");
            return Ok(false);
        }

        info!(livestream_id = row.livestream_id, cause, "Livestream ended");

        if let Some(stream_id) = &row.stream_id {
            if let Err(e) = self.provider.delete_stream(stream_id).await {
                warn!(
                    livestream_id = row.livestream_id,
                    stream_id = %stream_id,
                    error = %e,
                    "Failed to delete CDN stream"
                );
            }
        }

        Ok(true)
    }

    /// Owner-only removal of an ended session.
    pub async fn delete(&self, livestream_id: i64, seller_id: Option<i64>) -> Result<()> {
        let seller_id =
            seller_id.ok_or_else(|| AppError::MissingParameters("sellerId".to_string()))?;

        let row = self.load(livestream_id).await?;
        if row.seller_id != seller_id {
            return Err(AppError::Forbidden(format!(
                "seller {} does not own livestream {}",
                seller_id, livestream_id
            )));
        }
        if row.status != LivestreamStatus::Ended {
            return Err(AppError::NotEnded(livestream_id));
        }

        if let Some(stream_id) = &row.stream_id {
            if let Err(e) = self.provider.delete_stream(stream_id).await {
                warn!(livestream_id, stream_id = %stream_id, error = %e, "Failed to delete CDN stream");
            }
        }

        if !self.store.delete(livestream_id).await? {
            return Err(AppError::NotFound(format!("livestream {}", livestream_id)));
        }

        info!(livestream_id, seller_id, "Livestream deleted");
        Ok(())
    }

    // =========================================================================
    // Featured products
    // =========================================================================

    pub async fn update_featured_products(
        &self,
        livestream_id: i64,
        product_ids: &[i64],
    ) -> Result<Vec<FeaturedProduct>> {
        if !self
            .store
            .replace_featured_products(livestream_id, product_ids)
            .await?
        {
            return Err(AppError::NotFound(format!("livestream {}", livestream_id)));
        }

        debug!(livestream_id, count = product_ids.len(), "Featured products replaced");
        self.store.featured_products(livestream_id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_details(&self, livestream_id: i64) -> Result<LivestreamDetails> {
        let livestream = self
            .store
            .get_with_store(livestream_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("livestream {}", livestream_id)))?;
        let products = self.store.featured_products(livestream_id).await?;

        Ok(LivestreamDetails {
            livestream,
            products,
        })
    }

    pub async fn list_active(&self) -> Result<ActiveLivestreams> {
        let livestreams = self.store.list_active().await?;
        Ok(ActiveLivestreams {
            count: livestreams.len(),
            livestreams,
        })
    }

    /// Ready once live with a start time. Otherwise the CDN is asked, and an
    /// active stream is promoted to live. CDN failures read as not ready.
    pub async fn get_status(&self, livestream_id: i64) -> Result<StreamStatusResponse> {
        let row = self.load(livestream_id).await?;

        if row.status == LivestreamStatus::Live && row.actual_start_time.is_some() {
            return Ok(status_response(&row));
        }
        let Some(stream_id) = row.stream_id.as_deref() else {
            return Ok(status_response(&row));
        };
        if row.status == LivestreamStatus::Ended {
            return Ok(status_response(&row));
        }

        match self.provider.is_stream_active(stream_id).await {
            Ok(true) => {
                if self.store.mark_live(livestream_id).await? {
                    info!(livestream_id, "Livestream marked live from CDN status");
                }
                let row = self.load(livestream_id).await?;
                Ok(status_response(&row))
            }
            Ok(false) => Ok(status_response(&row)),
            Err(e) => {
                warn!(livestream_id, error = %e, "CDN status check failed");
                Ok(status_response(&row))
            }
        }
    }

    pub async fn viewer_count(&self, livestream_id: i64) -> Result<ViewerCountResponse> {
        let row = self.load(livestream_id).await?;
        Ok(ViewerCountResponse {
            viewer_count: row.peak_viewers,
        })
    }

    pub async fn add_viewer(&self, livestream_id: i64) -> Result<ViewerCountResponse> {
        let updated = self.store.add_viewer(livestream_id).await?;
        self.viewer_update(livestream_id, updated).await
    }

    pub async fn remove_viewer(&self, livestream_id: i64) -> Result<ViewerCountResponse> {
        let updated = self.store.remove_viewer(livestream_id).await?;
        self.viewer_update(livestream_id, updated).await
    }

    /// Viewer counts only move while live.
    async fn viewer_update(
        &self,
        livestream_id: i64,
        updated: Option<i32>,
    ) -> Result<ViewerCountResponse> {
        match updated {
            Some(viewer_count) => Ok(ViewerCountResponse { viewer_count }),
            None => {
                self.load(livestream_id).await?;
                Err(AppError::BadRequest(format!(
                    "livestream {} is not currently live",
                    livestream_id
                )))
            }
        }
    }

    pub async fn seller_history(&self, seller_id: i64) -> Result<SellerHistory> {
        let livestreams = self.store.seller_history(seller_id).await?;
        Ok(SellerHistory {
            count: livestreams.len(),
            livestreams,
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let stream_id = match event {
            WebhookEvent::StreamStarted { stream_id } | WebhookEvent::StreamIdle { stream_id } => {
                stream_id
            }
            WebhookEvent::Ignored { event } => {
                debug!(event = %event, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let Some(row) = self.store.find_by_stream_id(stream_id).await? else {
            debug!(stream_id = %stream_id, event = event.name(), "Webhook for unknown stream");
            return Ok(WebhookOutcome::UnknownStream);
        };

        let applied = match event {
            WebhookEvent::StreamStarted { .. } => {
                row.status != LivestreamStatus::Ended
                    && self.store.mark_live(row.livestream_id).await?
            }
            WebhookEvent::StreamIdle { .. } => {
                self.bridge.stop(row.livestream_id);
                self.finalize_session(&row, "cdn_idle").await?
            }
            WebhookEvent::Ignored { .. } => false,
        };

        info!(
            livestream_id = row.livestream_id,
            event = event.name(),
            applied,
            "Webhook reconciled"
        );

        Ok(if applied {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::AlreadyApplied
        })
    }

    /// Finalize sessions whose worker died without being asked to stop.
    pub async fn handle_worker_exit(&self, exit: &WorkerExit) -> Result<()> {
        if exit.requested {
            return Ok(());
        }

        let Some(row) = self.store.get(exit.livestream_id).await? else {
            warn!(livestream_id = exit.livestream_id, "Worker exited for unknown livestream");
            return Ok(());
        };
        if row.status == LivestreamStatus::Ended {
            return Ok(());
        }

        warn!(
            livestream_id = exit.livestream_id,
            exit_code = ?exit.exit_code,
            "Transcode worker crashed, ending livestream"
        );
        self.finalize_session(&row, "worker_exit").await?;
        Ok(())
    }

    /// Background task applying `handle_worker_exit` to every bridge exit.
    pub fn spawn_exit_reconciler(&self) -> JoinHandle<()> {
        let mut exits = self.bridge.subscribe_exits();
        let service = self.clone();

        tokio::spawn(async move {
            loop {
                match exits.recv().await {
                    Ok(exit) => {
                        if let Err(e) = service.handle_worker_exit(&exit).await {
                            error!(
                                livestream_id = exit.livestream_id,
                                error = %e,
                                "Failed to finalize livestream after worker exit"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Worker exit reconciler lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn status_response(row: &Livestream) -> StreamStatusResponse {
    StreamStatusResponse {
        status: row.status,
        is_ready: row.status == LivestreamStatus::Live && row.actual_start_time.is_some(),
        start_time: row.actual_start_time,
    }
}
