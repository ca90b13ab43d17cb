//! Database repository for livestream sessions
//!
//! All PostgreSQL queries for `livestreams` and `livestream_products`.
//! Status transitions are guarded in SQL so concurrent writers (client end
//! vs. CDN webhook) cannot move a row backwards or finalize it twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;
use crate::models::{
    FeaturedProduct, Livestream, LivestreamSummary, LivestreamWithStore, NewLivestream,
};

/// Persistence seam used by the service layer.
#[async_trait]
pub trait LivestreamStore: Send + Sync {
    /// Insert a live row (start time = now) and its featured products in one
    /// transaction.
    async fn create_with_products(
        &self,
        new: &NewLivestream,
        product_ids: &[i64],
    ) -> Result<Livestream>;

    async fn get(&self, livestream_id: i64) -> Result<Option<Livestream>>;

    async fn get_with_store(&self, livestream_id: i64) -> Result<Option<LivestreamWithStore>>;

    async fn find_by_stream_id(&self, stream_id: &str) -> Result<Option<Livestream>>;

    /// created/live -> live with start time = now. False when the row is
    /// missing or already ended.
    async fn mark_live(&self, livestream_id: i64) -> Result<bool>;

    /// -> ended, recording end time and duration. False when the row is
    /// missing or already ended, in which case nothing is written.
    async fn finalize(&self, livestream_id: i64, end_time: DateTime<Utc>) -> Result<bool>;

    /// Count one more viewer on a live row. None when the row is missing or
    /// not live.
    async fn add_viewer(&self, livestream_id: i64) -> Result<Option<i32>>;

    /// Count one viewer fewer on a live row, never below zero.
    async fn remove_viewer(&self, livestream_id: i64) -> Result<Option<i32>>;

    /// Delete-then-insert in one transaction. False when the livestream does
    /// not exist.
    async fn replace_featured_products(&self, livestream_id: i64, product_ids: &[i64])
        -> Result<bool>;

    async fn featured_products(&self, livestream_id: i64) -> Result<Vec<FeaturedProduct>>;

    async fn list_active(&self) -> Result<Vec<LivestreamSummary>>;

    async fn seller_history(&self, seller_id: i64) -> Result<Vec<Livestream>>;

    async fn delete(&self, livestream_id: i64) -> Result<bool>;
}

/// Repository for livestream database operations
#[derive(Clone)]
pub struct PgLivestreamStore {
    pool: PgPool,
}

impl PgLivestreamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_products(
    tx: &mut Transaction<'_, Postgres>,
    livestream_id: i64,
    product_ids: &[i64],
) -> Result<()> {
    if product_ids.is_empty() {
        return Ok(());
    }

    // display_order is the 0-based position in the caller's list
    sqlx::query(
        r#"
        INSERT INTO livestream_products (livestream_id, product_id, display_order)
        SELECT $1, p.product_id, (p.ord - 1)::INT
        FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS p(product_id, ord)
        "#,
    )
    .bind(livestream_id)
    .bind(product_ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl LivestreamStore for PgLivestreamStore {
    // =========================================================================
    // Create Operations
    // =========================================================================

    async fn create_with_products(
        &self,
        new: &NewLivestream,
        product_ids: &[i64],
    ) -> Result<Livestream> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Livestream>(
            r#"
            INSERT INTO livestreams (
                seller_id, title, description, thumbnail_url, stream_id, stream_key,
                rtmp_url, hls_url, status, actual_start_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'live', NOW())
            RETURNING
                livestream_id, seller_id, title, description, stream_id, stream_key,
                thumbnail_url, status, rtmp_url, hls_url, actual_start_time, end_time,
                duration_seconds, peak_viewers, total_viewers, total_comments, total_sales,
                created_at
            "#,
        )
        .bind(new.seller_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.thumbnail_url)
        .bind(&new.stream_id)
        .bind(&new.stream_key)
        .bind(&new.rtmp_url)
        .bind(&new.hls_url)
        .fetch_one(&mut *tx)
        .await?;

        insert_products(&mut tx, row.livestream_id, product_ids).await?;
        tx.commit().await?;

        Ok(row)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    async fn get(&self, livestream_id: i64) -> Result<Option<Livestream>> {
        let row = sqlx::query_as::<_, Livestream>(
            r#"
            SELECT
                livestream_id, seller_id, title, description, stream_id, stream_key,
                thumbnail_url, status, rtmp_url, hls_url, actual_start_time, end_time,
                duration_seconds, peak_viewers, total_viewers, total_comments, total_sales,
                created_at
            FROM livestreams
            WHERE livestream_id = $1
            "#,
        )
        .bind(livestream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_with_store(&self, livestream_id: i64) -> Result<Option<LivestreamWithStore>> {
        let row = sqlx::query_as::<_, LivestreamWithStore>(
            r#"
            SELECT
                l.livestream_id, l.seller_id, l.title, l.description, l.stream_id,
                l.stream_key, l.thumbnail_url, l.status, l.rtmp_url, l.hls_url,
                l.actual_start_time, l.end_time, l.duration_seconds, l.peak_viewers,
                l.total_viewers, l.total_comments, l.total_sales, l.created_at,
                s.store_name, s.store_logo_key
            FROM livestreams l
            LEFT JOIN sellers s ON s.user_id = l.seller_id
            WHERE l.livestream_id = $1
            "#,
        )
        .bind(livestream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_stream_id(&self, stream_id: &str) -> Result<Option<Livestream>> {
        let row = sqlx::query_as::<_, Livestream>(
            r#"
            SELECT
                livestream_id, seller_id, title, description, stream_id, stream_key,
                thumbnail_url, status, rtmp_url, hls_url, actual_start_time, end_time,
                duration_seconds, peak_viewers, total_viewers, total_comments, total_sales,
                created_at
            FROM livestreams
            WHERE stream_id = $1
            "#,
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn featured_products(&self, livestream_id: i64) -> Result<Vec<FeaturedProduct>> {
        let rows = sqlx::query_as::<_, FeaturedProduct>(
            r#"
            SELECT livestream_id, product_id, display_order, is_pinned
            FROM livestream_products
            WHERE livestream_id = $1
            ORDER BY display_order
            "#,
        )
        .bind(livestream_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_active(&self) -> Result<Vec<LivestreamSummary>> {
        let rows = sqlx::query_as::<_, LivestreamSummary>(
            r#"
            SELECT
                l.livestream_id, l.seller_id, l.title, l.description, l.thumbnail_url,
                l.hls_url, l.peak_viewers, l.actual_start_time,
                s.store_name, s.store_logo_key
            FROM livestreams l
            LEFT JOIN sellers s ON s.user_id = l.seller_id
            WHERE l.status = 'live'
            ORDER BY l.actual_start_time DESC NULLS LAST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn seller_history(&self, seller_id: i64) -> Result<Vec<Livestream>> {
        let rows = sqlx::query_as::<_, Livestream>(
            r#"
            SELECT
                livestream_id, seller_id, title, description, stream_id, stream_key,
                thumbnail_url, status, rtmp_url, hls_url, actual_start_time, end_time,
                duration_seconds, peak_viewers, total_viewers, total_comments, total_sales,
                created_at
            FROM livestreams
            WHERE seller_id = $1 AND status = 'ended'
            ORDER BY created_at DESC
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Status Transitions
    // =========================================================================

    async fn mark_live(&self, livestream_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE livestreams
            SET status = 'live', actual_start_time = NOW()
            WHERE livestream_id = $1 AND status <> 'ended'
            "#,
        )
        .bind(livestream_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize(&self, livestream_id: i64, end_time: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE livestreams
            SET status = 'ended',
                end_time = $2,
                duration_seconds = COALESCE(
                    GREATEST(FLOOR(EXTRACT(EPOCH FROM ($2 - actual_start_time)))::BIGINT, 0),
                    0
                )
            WHERE livestream_id = $1 AND status <> 'ended'
            "#,
        )
        .bind(livestream_id)
        .bind(end_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Viewers
    // =========================================================================

    async fn add_viewer(&self, livestream_id: i64) -> Result<Option<i32>> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE livestreams
            SET peak_viewers = peak_viewers + 1
            WHERE livestream_id = $1 AND status = 'live'
            RETURNING peak_viewers
            "#,
        )
        .bind(livestream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    async fn remove_viewer(&self, livestream_id: i64) -> Result<Option<i32>> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE livestreams
            SET peak_viewers = GREATEST(peak_viewers - 1, 0)
            WHERE livestream_id = $1 AND status = 'live'
            RETURNING peak_viewers
            "#,
        )
        .bind(livestream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Featured Products
    // =========================================================================

    async fn replace_featured_products(
        &self,
        livestream_id: i64,
        product_ids: &[i64],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT livestream_id FROM livestreams WHERE livestream_id = $1 FOR UPDATE",
        )
        .bind(livestream_id)
        .fetch_optional(&mut *tx)
        .await?;

        if exists.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM livestream_products WHERE livestream_id = $1")
            .bind(livestream_id)
            .execute(&mut *tx)
            .await?;

        insert_products(&mut tx, livestream_id, product_ids).await?;
        tx.commit().await?;

        Ok(true)
    }

    // =========================================================================
    // Delete Operations
    // =========================================================================

    async fn delete(&self, livestream_id: i64) -> Result<bool> {
        // livestream_products rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM livestreams WHERE livestream_id = $1")
            .bind(livestream_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
