//! Database access layer for livestream-service
pub mod livestream_repo;

pub use livestream_repo::{LivestreamStore, PgLivestreamStore};
