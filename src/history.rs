use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DatabaseConfig;
use crate::models::{HistoryStats, NormalizedProduct, RecentSearch, SearchResultRow, StoreCount};
use crate::utils::error::Result;

/// Durable record of completed searches. Writes are best-effort: the
/// orchestrator logs a failed save and moves on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn save(&self, query: &str, products: &[NormalizedProduct]) -> Result<()>;
}

/// SQLite-backed search history.
#[derive(Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let filename = options.clone().get_filename().to_path_buf();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let history = Self { pool };
        history.run_migrations().await?;
        tracing::info!(url = %config.url, "History store ready");
        Ok(history)
    }

    /// Ephemeral store on a single in-memory connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let history = Self { pool };
        history.run_migrations().await?;
        Ok(history)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                store TEXT NOT NULL,
                product_name TEXT NOT NULL,
                price REAL NOT NULL,
                original_price REAL,
                url TEXT NOT NULL,
                image_url TEXT,
                rating REAL,
                review_count INTEGER,
                in_stock BOOLEAN NOT NULL DEFAULT 1,
                searched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_results_query ON search_results(query)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_search_results_store_name ON search_results(store, product_name)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_search_results_searched_at ON search_results(searched_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_at(
        &self,
        query: &str,
        products: &[NormalizedProduct],
        searched_at: NaiveDateTime,
    ) -> Result<()> {
        if products.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for product in products {
            sqlx::query(
                r#"
                INSERT INTO search_results
                    (query, store, product_name, price, original_price, url, image_url,
                     rating, review_count, in_stock, searched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(query)
            .bind(&product.store)
            .bind(&product.name)
            .bind(product.price.to_f64())
            .bind(product.original_price.and_then(|p| p.to_f64()))
            .bind(&product.url)
            .bind(product.image_url.as_deref())
            .bind(product.rating)
            .bind(product.review_count.map(|c| c as i64))
            .bind(product.in_stock)
            .bind(searched_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(query, saved = products.len(), "Saved search results");
        Ok(())
    }

    /// Distinct queries, most recently searched first.
    pub async fn recent_searches(&self, limit: u32) -> Result<Vec<RecentSearch>> {
        let rows = sqlx::query_as::<_, RecentSearch>(
            r#"
            SELECT query, MAX(searched_at) AS last_searched
            FROM search_results
            GROUP BY query
            ORDER BY last_searched DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Past rows of a store whose name contains `name`, newest first.
    pub async fn price_history(&self, name: &str, store: &str, limit: u32) -> Result<Vec<SearchResultRow>> {
        let rows = sqlx::query_as::<_, SearchResultRow>(
            r#"
            SELECT id, query, store, product_name, price, original_price, url, image_url,
                   rating, review_count, in_stock, searched_at
            FROM search_results
            WHERE product_name LIKE ? AND store = ?
            ORDER BY searched_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(format!("%{}%", name))
        .bind(store)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn stats(&self) -> Result<HistoryStats> {
        let total_searches: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT query) FROM search_results")
            .fetch_one(&self.pool)
            .await?;
        let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_results")
            .fetch_one(&self.pool)
            .await?;
        let store_stats = sqlx::query_as::<_, StoreCount>(
            r#"
            SELECT store, COUNT(*) AS count
            FROM search_results
            GROUP BY store
            ORDER BY count DESC, store ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(HistoryStats {
            total_searches,
            total_products,
            store_stats,
        })
    }

    /// Deletes rows older than `retention_days`; returns how many were removed.
    pub async fn clean_old_data(&self, retention_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - ChronoDuration::days(retention_days as i64)).naive_utc();
        let result = sqlx::query("DELETE FROM search_results WHERE searched_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, retention_days, "Removed old search results");
        }
        Ok(removed)
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn save(&self, query: &str, products: &[NormalizedProduct]) -> Result<()> {
        self.save_at(query, products, Utc::now().naive_utc()).await
    }
}
