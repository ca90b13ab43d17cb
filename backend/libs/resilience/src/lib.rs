//! Resilience helpers shared by the livestream backend
//!
//! - **Retry**: exponential backoff with jitter for idempotent upstream calls
//! - **Backoff**: stateful delay generator for long-running poll loops
//! - **Timeout**: time limits on calls to external processes and services
//!
//! # Example: Idempotent CDN read with retry
//!
//! ```rust,no_run
//! use resilience::{with_retry, RetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = with_retry(RetryConfig::default(), || async {
//!         // GET /stream/{id}
//!         Ok::<_, String>(true)
//!     })
//!     .await;
//! }
//! ```
pub mod retry;
pub mod timeout;

pub use retry::{with_retry, Backoff, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
