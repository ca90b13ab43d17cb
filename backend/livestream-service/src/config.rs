/// Configuration management for livestream-service
///
/// Loads configuration from environment variables (and `.env` when present)
/// with defaults for everything except the database URL and the webhook secret.
use db_pool::env_utils::{parse_env_optional, parse_env_with_default};
use db_pool::DbConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const SERVICE_NAME: &str = "livestream-service";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("database configuration: {0}")]
    Database(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub database: DbConfig,
    pub cdn: CdnConfig,
    pub bridge: BridgeConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    /// `json` switches the log output to JSON lines
    pub log_format: String,
}

/// Livepeer-style CDN account and delivery endpoints.
#[derive(Clone)]
pub struct CdnConfig {
    pub api_url: String,
    pub api_key: String,
    pub srt_host: String,
    pub srt_port: u16,
    pub hls_base_url: String,
    pub webhook_secret: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for CdnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdnConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("srt_host", &self.srt_host)
            .field("srt_port", &self.srt_port)
            .field("hls_base_url", &self.hls_base_url)
            .field("webhook_secret", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Transcode worker settings.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub ffmpeg_path: PathBuf,
    pub default_audio_port: u16,
    pub default_video_port: u16,
    /// Where `janus_forward_<id>.sdp` files are written
    pub sdp_dir: PathBuf,
    /// Time a worker gets between SIGTERM and SIGKILL
    pub stop_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            default_audio_port: 6002,
            default_video_port: 6004,
            sdp_dir: std::env::temp_dir(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let webhook_secret = std::env::var("CDN_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("CDN_WEBHOOK_SECRET"))?;

        let bridge_defaults = BridgeConfig::default();

        Ok(Config {
            app: AppConfig {
                host: std::env::var("LIVESTREAM_SERVICE_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_with_default("LIVESTREAM_SERVICE_PORT", 8086),
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            },
            database: DbConfig::from_env(SERVICE_NAME).map_err(ConfigError::Database)?,
            cdn: CdnConfig {
                api_url: std::env::var("CDN_API_URL")
                    .unwrap_or_else(|_| "https://livepeer.studio/api".to_string()),
                api_key: std::env::var("CDN_API_KEY").unwrap_or_default(),
                srt_host: std::env::var("CDN_SRT_HOST")
                    .unwrap_or_else(|_| "rtmp.livepeer.com".to_string()),
                srt_port: parse_env_with_default("CDN_SRT_PORT", 2935),
                hls_base_url: std::env::var("CDN_HLS_BASE_URL")
                    .unwrap_or_else(|_| "https://livepeer.studio".to_string()),
                webhook_secret,
                request_timeout: Duration::from_secs(parse_env_with_default(
                    "CDN_REQUEST_TIMEOUT_SECS",
                    10,
                )),
            },
            bridge: BridgeConfig {
                ffmpeg_path: parse_env_optional::<String>("FFMPEG_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(bridge_defaults.ffmpeg_path),
                default_audio_port: parse_env_with_default(
                    "BRIDGE_AUDIO_PORT",
                    bridge_defaults.default_audio_port,
                ),
                default_video_port: parse_env_with_default(
                    "BRIDGE_VIDEO_PORT",
                    bridge_defaults.default_video_port,
                ),
                sdp_dir: parse_env_optional::<String>("BRIDGE_SDP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(bridge_defaults.sdp_dir),
                stop_grace: Duration::from_millis(parse_env_with_default(
                    "BRIDGE_STOP_GRACE_MS",
                    bridge_defaults.stop_grace.as_millis() as u64,
                )),
            },
        })
    }
}
