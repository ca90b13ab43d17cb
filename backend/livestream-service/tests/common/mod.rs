//! Shared fixtures for livestream-service integration tests
//!
//! - `InMemoryStore`: `LivestreamStore` with the same guarded transitions as
//!   the PostgreSQL repository
//! - `FakeProvider`: CDN that records what was asked of it
//! - `ScriptLauncher`: real short-lived `sh` processes as transcode workers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livestream_service::config::BridgeConfig;
use livestream_service::db::LivestreamStore;
use livestream_service::error::{AppError, Result};
use livestream_service::models::{
    FeaturedProduct, Livestream, LivestreamStatus, LivestreamSummary, LivestreamWithStore,
    NewLivestream,
};
use livestream_service::services::bridge::{BridgeSupervisor, WorkerLauncher, WorkerSpec};
use livestream_service::services::cdn::{
    DeliveryEndpoints, ProviderError, ProvisionedStream, StreamProvider,
};
use livestream_service::services::LivestreamService;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

pub const WEBHOOK_SECRET: &str = "whsec_integration";

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    next_id: i64,
    rows: BTreeMap<i64, Livestream>,
    products: HashMap<i64, Vec<FeaturedProduct>>,
    sellers: HashMap<i64, (String, Option<String>)>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    /// Every trait call bumps this
    calls: AtomicUsize,
    fail_inserts: std::sync::atomic::AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn add_seller(&self, seller_id: i64, store_name: &str) {
        self.state
            .lock()
            .unwrap()
            .sellers
            .insert(seller_id, (store_name.to_string(), None));
    }

    pub fn row(&self, livestream_id: i64) -> Option<Livestream> {
        self.state.lock().unwrap().rows.get(&livestream_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    /// Insert a row directly, e.g. one still in `created`.
    pub fn insert_row(&self, seller_id: i64, stream_id: &str, status: LivestreamStatus) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let started = (status != LivestreamStatus::Created).then(Utc::now);
        state.rows.insert(
            id,
            Livestream {
                livestream_id: id,
                seller_id,
                title: format!("stream {}", id),
                description: None,
                stream_id: Some(stream_id.to_string()),
                stream_key: format!("key-{}", id),
                thumbnail_url: None,
                status,
                rtmp_url: None,
                hls_url: None,
                actual_start_time: started,
                end_time: None,
                duration_seconds: None,
                peak_viewers: 0,
                total_viewers: 0,
                total_comments: 0,
                total_sales: 0,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Move the recorded start time back, so durations are non-zero.
    pub fn backdate_start(&self, livestream_id: i64, by: chrono::Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&livestream_id) {
            row.actual_start_time = row.actual_start_time.map(|t| t - by);
        }
    }

    pub fn set_peak_viewers(&self, livestream_id: i64, peak: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&livestream_id) {
            row.peak_viewers = peak;
        }
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn featured(livestream_id: i64, product_ids: &[i64]) -> Vec<FeaturedProduct> {
    product_ids
        .iter()
        .enumerate()
        .map(|(i, product_id)| FeaturedProduct {
            livestream_id,
            product_id: *product_id,
            display_order: i as i32,
            is_pinned: false,
        })
        .collect()
}

#[async_trait]
impl LivestreamStore for InMemoryStore {
    async fn create_with_products(
        &self,
        new: &NewLivestream,
        product_ids: &[i64],
    ) -> Result<Livestream> {
        self.touch();
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError("insert failed".to_string()));
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let row = Livestream {
            livestream_id: id,
            seller_id: new.seller_id,
            title: new.title.clone(),
            description: new.description.clone(),
            stream_id: Some(new.stream_id.clone()),
            stream_key: new.stream_key.clone(),
            thumbnail_url: new.thumbnail_url.clone(),
            status: LivestreamStatus::Live,
            rtmp_url: new.rtmp_url.clone(),
            hls_url: new.hls_url.clone(),
            actual_start_time: Some(Utc::now()),
            end_time: None,
            duration_seconds: None,
            peak_viewers: 0,
            total_viewers: 0,
            total_comments: 0,
            total_sales: 0,
            created_at: Utc::now(),
        };
        state.rows.insert(id, row.clone());
        state.products.insert(id, featured(id, product_ids));
        Ok(row)
    }

    async fn get(&self, livestream_id: i64) -> Result<Option<Livestream>> {
        self.touch();
        Ok(self.row(livestream_id))
    }

    async fn get_with_store(&self, livestream_id: i64) -> Result<Option<LivestreamWithStore>> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(state.rows.get(&livestream_id).map(|row| {
            let store = state.sellers.get(&row.seller_id);
            LivestreamWithStore {
                livestream: row.clone(),
                store_name: store.map(|s| s.0.clone()),
                store_logo_key: store.and_then(|s| s.1.clone()),
            }
        }))
    }

    async fn find_by_stream_id(&self, stream_id: &str) -> Result<Option<Livestream>> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .values()
            .find(|row| row.stream_id.as_deref() == Some(stream_id))
            .cloned())
    }

    async fn mark_live(&self, livestream_id: i64) -> Result<bool> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        match state.rows.get_mut(&livestream_id) {
            Some(row) if row.status != LivestreamStatus::Ended => {
                row.status = LivestreamStatus::Live;
                row.actual_start_time = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(&self, livestream_id: i64, end_time: DateTime<Utc>) -> Result<bool> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        match state.rows.get_mut(&livestream_id) {
            Some(row) if row.status != LivestreamStatus::Ended => {
                row.status = LivestreamStatus::Ended;
                row.end_time = Some(end_time);
                row.duration_seconds = Some(
                    livestream_service::models::duration_between(row.actual_start_time, end_time),
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_viewer(&self, livestream_id: i64) -> Result<Option<i32>> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        Ok(match state.rows.get_mut(&livestream_id) {
            Some(row) if row.status == LivestreamStatus::Live => {
                row.peak_viewers += 1;
                Some(row.peak_viewers)
            }
            _ => None,
        })
    }

    async fn remove_viewer(&self, livestream_id: i64) -> Result<Option<i32>> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        Ok(match state.rows.get_mut(&livestream_id) {
            Some(row) if row.status == LivestreamStatus::Live => {
                row.peak_viewers = (row.peak_viewers - 1).max(0);
                Some(row.peak_viewers)
            }
            _ => None,
        })
    }

    async fn replace_featured_products(
        &self,
        livestream_id: i64,
        product_ids: &[i64],
    ) -> Result<bool> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        if !state.rows.contains_key(&livestream_id) {
            return Ok(false);
        }
        state
            .products
            .insert(livestream_id, featured(livestream_id, product_ids));
        Ok(true)
    }

    async fn featured_products(&self, livestream_id: i64) -> Result<Vec<FeaturedProduct>> {
        self.touch();
        let state = self.state.lock().unwrap();
        Ok(state.products.get(&livestream_id).cloned().unwrap_or_default())
    }

    async fn list_active(&self) -> Result<Vec<LivestreamSummary>> {
        self.touch();
        let state = self.state.lock().unwrap();
        let mut active: Vec<LivestreamSummary> = state
            .rows
            .values()
            .filter(|row| row.status == LivestreamStatus::Live)
            .map(|row| {
                let store = state.sellers.get(&row.seller_id);
                LivestreamSummary {
                    livestream_id: row.livestream_id,
                    seller_id: row.seller_id,
                    title: row.title.clone(),
                    description: row.description.clone(),
                    thumbnail_url: row.thumbnail_url.clone(),
                    hls_url: row.hls_url.clone(),
                    peak_viewers: row.peak_viewers,
                    actual_start_time: row.actual_start_time,
                    store_name: store.map(|s| s.0.clone()),
                    store_logo_key: store.and_then(|s| s.1.clone()),
                }
            })
            .collect();
        active.sort_by(|a, b| b.actual_start_time.cmp(&a.actual_start_time));
        Ok(active)
    }

    async fn seller_history(&self, seller_id: i64) -> Result<Vec<Livestream>> {
        self.touch();
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Livestream> = state
            .rows
            .values()
            .filter(|row| row.seller_id == seller_id && row.status == LivestreamStatus::Ended)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.livestream_id.cmp(&a.livestream_id))
        });
        Ok(rows)
    }

    async fn delete(&self, livestream_id: i64) -> Result<bool> {
        self.touch();
        let mut state = self.state.lock().unwrap();
        state.products.remove(&livestream_id);
        Ok(state.rows.remove(&livestream_id).is_some())
    }
}

// =============================================================================
// CDN
// =============================================================================

#[derive(Default)]
pub struct FakeProvider {
    created: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    active: std::sync::atomic::AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamProvider for FakeProvider {
    async fn create_stream(&self, _name: &str) -> std::result::Result<ProvisionedStream, ProviderError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProvisionedStream {
            id: format!("st_{}", n),
            stream_key: format!("key-{}", n),
            playback_id: Some(format!("pb{}", n)),
            rtmp_ingest_url: Some("rtmp://rtmp.livepeer.com/live".to_string()),
        })
    }

    async fn is_stream_active(&self, _stream_id: &str) -> std::result::Result<bool, ProviderError> {
        Ok(self.active.load(Ordering::SeqCst))
    }

    async fn delete_stream(&self, stream_id: &str) -> std::result::Result<(), ProviderError> {
        self.deleted.lock().unwrap().push(stream_id.to_string());
        Ok(())
    }
}

pub fn endpoints() -> DeliveryEndpoints {
    DeliveryEndpoints {
        srt_host: "rtmp.livepeer.com".to_string(),
        srt_port: 2935,
        hls_base_url: "https://livepeer.studio".to_string(),
    }
}

// =============================================================================
// Workers
// =============================================================================

/// Runs `sh -c <script>` in place of the transcoder.
pub struct ScriptLauncher {
    script: &'static str,
    launches: AtomicUsize,
}

impl ScriptLauncher {
    pub fn new(script: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script,
            launches: AtomicUsize::new(0),
        })
    }

    /// Long-running worker that exits on SIGTERM.
    pub fn sleeper() -> Arc<Self> {
        Self::new("exec sleep 30")
    }

    /// Worker that dies right away with a failure code.
    pub fn crasher() -> Arc<Self> {
        Self::new("echo 'Connection refused' >&2; exit 1")
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for ScriptLauncher {
    fn launch(&self, _spec: &WorkerSpec<'_>) -> io::Result<Child> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Command::new("sh")
            .arg("-c")
            .arg(self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

pub fn bridge_config(sdp_dir: &Path) -> BridgeConfig {
    BridgeConfig {
        sdp_dir: sdp_dir.to_path_buf(),
        stop_grace: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn supervisor(sdp_dir: &Path, launcher: Arc<ScriptLauncher>) -> BridgeSupervisor {
    BridgeSupervisor::new(&bridge_config(sdp_dir), launcher)
}

pub fn sdp_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".sdp"))
        .collect();
    names.sort();
    names
}

/// Service wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub service: LivestreamService,
    pub sdp_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(launcher: Arc<ScriptLauncher>) -> Self {
        let store = InMemoryStore::new();
        let provider = FakeProvider::new();
        let sdp_dir = tempfile::tempdir().unwrap();
        let service = LivestreamService::new(
            store.clone(),
            provider.clone(),
            supervisor(sdp_dir.path(), launcher),
            endpoints(),
        );
        Self {
            store,
            provider,
            service,
            sdp_dir,
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
