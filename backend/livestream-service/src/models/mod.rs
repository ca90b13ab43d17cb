//! Data models for livestream sessions
//!
//! Row structs map the `livestreams` / `livestream_products` tables; request
//! and response structs are the camelCase JSON contract of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

// =============================================================================
// Livestream Status Enum
// =============================================================================

/// Session lifecycle. Transitions are monotonic: created -> live -> ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LivestreamStatus {
    /// Row exists, CDN has not reported the stream yet
    Created,
    /// Media is reaching the CDN
    Live,
    /// Terminal
    Ended,
}

impl LivestreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }
}

// =============================================================================
// Database Rows
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Livestream {
    pub livestream_id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// CDN-side stream id, the key webhooks refer to
    pub stream_id: Option<String>,
    /// Ingest secret; only ever returned by create-and-start
    #[serde(skip_serializing)]
    pub stream_key: String,
    pub thumbnail_url: Option<String>,
    pub status: LivestreamStatus,
    pub rtmp_url: Option<String>,
    pub hls_url: Option<String>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub peak_viewers: i32,
    pub total_viewers: i32,
    pub total_comments: i32,
    pub total_sales: i64,
    pub created_at: DateTime<Utc>,
}

impl Livestream {
    pub fn stats(&self) -> LivestreamStats {
        LivestreamStats {
            peak_viewers: self.peak_viewers,
            total_viewers: self.total_viewers,
            total_comments: self.total_comments,
            total_sales: self.total_sales,
        }
    }
}

/// Livestream row joined with the seller's storefront display data.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamWithStore {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub livestream: Livestream,
    pub store_name: Option<String>,
    pub store_logo_key: Option<String>,
}

/// Card shown in the "live now" listing.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamSummary {
    pub livestream_id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub hls_url: Option<String>,
    pub peak_viewers: i32,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub store_name: Option<String>,
    pub store_logo_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedProduct {
    pub livestream_id: i64,
    pub product_id: i64,
    /// 0-based position in the seller's list
    pub display_order: i32,
    pub is_pinned: bool,
}

/// Values for a new `livestreams` row.
#[derive(Debug, Clone)]
pub struct NewLivestream {
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub stream_id: String,
    pub stream_key: String,
    pub rtmp_url: Option<String>,
    pub hls_url: Option<String>,
}

// =============================================================================
// API Request Models
// =============================================================================

/// Presence of `sellerId` and `title` is checked by the service so a missing
/// field maps to `MISSING_PARAMETERS` rather than a JSON decode error.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAndStartRequest {
    pub seller_id: Option<i64>,

    #[validate(length(max = 255))]
    pub title: Option<String>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    #[validate(length(max = 2048))]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub product_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBridgeRequest {
    pub livestream_id: Option<i64>,
    /// Egress SRT URL returned by create-and-start
    pub srt_url: Option<String>,
    pub audio_port: Option<u16>,
    pub video_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductsRequest {
    #[serde(default)]
    pub product_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLivestreamQuery {
    pub seller_id: Option<i64>,
}

// =============================================================================
// API Response Models
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAndStartResponse {
    pub livestream_id: i64,
    pub stream_key: String,
    /// Where the transcode worker must push (pass back to start-bridge)
    pub srt_url: String,
    pub rtmp_url: Option<String>,
    pub hls_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamStats {
    pub peak_viewers: i32,
    pub total_viewers: i32,
    pub total_comments: i32,
    pub total_sales: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndLivestreamResponse {
    pub duration_seconds: i64,
    pub stats: LivestreamStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivestreamDetails {
    pub livestream: LivestreamWithStore,
    pub products: Vec<FeaturedProduct>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLivestreams {
    pub livestreams: Vec<LivestreamSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusResponse {
    pub status: LivestreamStatus,
    pub is_ready: bool,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerCountResponse {
    pub viewer_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBridgeResponse {
    pub livestream_id: i64,
    /// False when no worker was registered
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerHistory {
    pub livestreams: Vec<Livestream>,
    pub count: usize,
}

/// Seconds between start and end, 0 without a recorded start.
pub fn duration_between(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> i64 {
    start
        .map(|s| (end - s).num_seconds().max(0))
        .unwrap_or(0)
}
