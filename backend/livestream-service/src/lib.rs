//! Livestream Service Library
//!
//! Server side of the live-commerce streaming bridge: provisions CDN streams,
//! runs one transcode worker per live session (SFU RTP in, SRT out) and keeps
//! session status in sync with the CDN's webhooks.
//!
//! # Modules
//!
//! - `handlers`: HTTP request handlers and route table
//! - `models`: Rows plus the JSON request/response contract
//! - `services`: Session orchestrator, bridge supervisor, CDN client, webhooks
//! - `db`: PostgreSQL repository
//! - `error`: Error types and HTTP rendering
//! - `config`: Configuration management
//! - `metrics`: Prometheus metrics
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
